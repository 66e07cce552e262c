use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures of the fetch/verify pipeline. None of them is fatal to the
/// polling loop; the tick is logged and the next one tries again.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Retries for 5xx responses or connection failures ran out.
    #[error("request to {url} failed after {attempts} attempt(s): {reason}")]
    TransientNetwork {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("request to {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("malformed metadata response: {0}")]
    MalformedResponse(String),

    #[error("metadata response contained no images")]
    NoImageAvailable,

    #[error("{url} did not return an image (content type {content_type:?})")]
    NotAnImage {
        url: String,
        content_type: Option<String>,
    },

    /// The downloaded bytes did not decode. The temp file has been removed.
    #[error("downloaded file {} is not a valid image: {reason}", path.display())]
    CorruptImage { path: PathBuf, reason: String },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FetchError {
    /// True for failures that happened after metadata was known, i.e. the
    /// download itself went wrong.
    pub fn is_download_failure(&self) -> bool {
        matches!(
            self,
            FetchError::NotAnImage { .. } | FetchError::CorruptImage { .. } | FetchError::Io { .. }
        )
    }
}

/// Outcome of a full check: either fetching or applying failed.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("failed to apply wallpaper {}: {reason}", path.display())]
    Apply { path: PathBuf, reason: String },
}

/// Errors reading or writing `config.json`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine per-user directories")]
    NoHomeDir,

    #[error("I/O error accessing config at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config JSON at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
