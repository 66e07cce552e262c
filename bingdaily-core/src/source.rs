//! Bing image-of-the-day client: metadata lookup, idempotent download,
//! verification and atomic install into the image cache.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::FetchError;
use crate::http::{HttpTransport, RetryPolicy};
use crate::proxy::ProxySetting;

pub const BING_API: &str = "https://www.bing.com/HPImageArchive.aspx?format=js&idx=0&n=1&mkt=en-US";
pub const BING_HOST: &str = "www.bing.com";

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
pub struct BingImage {
    pub url: Option<String>,
    pub startdate: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub copyright: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BingResponse {
    #[serde(default)]
    pub images: Vec<BingImage>,
}

/// One published image, keyed by its `YYYYMMDD` start date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyImage {
    pub remote_url: String,
    pub date_key: String,
    pub local_path: PathBuf,
}

/// Canonical cache file for a date: `bing_<date_key>.jpg`.
pub fn image_file_name(date_key: &str) -> String {
    format!("bing_{}.jpg", date_key)
}

/// `date_key` ends up in a file name, so it has to be a real calendar date.
pub fn validate_date_key(date_key: &str) -> Result<(), FetchError> {
    if date_key.len() != 8 || !date_key.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FetchError::MalformedResponse(format!(
            "startdate {:?} is not YYYYMMDD",
            date_key
        )));
    }
    NaiveDate::parse_from_str(date_key, "%Y%m%d")
        .map(|_| ())
        .map_err(|e| FetchError::MalformedResponse(format!("startdate {:?}: {}", date_key, e)))
}

/// `images[0]` as `(absolute image url, date_key)`.
pub fn parse_metadata(body: &str) -> Result<(String, String), FetchError> {
    let response: BingResponse =
        serde_json::from_str(body).map_err(|e| FetchError::MalformedResponse(e.to_string()))?;
    let image = response.images.into_iter().next().ok_or(FetchError::NoImageAvailable)?;

    let url = image
        .url
        .filter(|u| !u.is_empty())
        .ok_or_else(|| FetchError::MalformedResponse("images[0].url is missing".into()))?;
    let date_key = image
        .startdate
        .ok_or_else(|| FetchError::MalformedResponse("images[0].startdate is missing".into()))?;
    validate_date_key(&date_key)?;

    let remote_url = if url.starts_with("http") {
        url
    } else {
        format!("https://{}{}", BING_HOST, url)
    };
    Ok((remote_url, date_key))
}

/// Decode the whole file; header sniffing alone would accept truncated data.
pub fn verify_image(path: &Path) -> Result<(), FetchError> {
    let corrupt = |reason: String| FetchError::CorruptImage {
        path: path.to_path_buf(),
        reason,
    };
    let reader = image::ImageReader::open(path)
        .map_err(|e| corrupt(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| corrupt(e.to_string()))?;
    reader.decode().map(|_| ()).map_err(|e| corrupt(e.to_string()))
}

fn has_content(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}

/// Newest-first listing of cached daily images, at most `limit` entries.
pub fn list_cached_images(dir: &Path, limit: usize) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut images: Vec<(SystemTime, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with("bing_") && name.ends_with(".jpg"))
                .unwrap_or(false)
        })
        .filter(|path| has_content(path))
        .map(|path| {
            let modified = fs::metadata(&path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, path)
        })
        .collect();

    // newest first; file name breaks ties so equal mtimes stay deterministic
    images.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
    images.into_iter().take(limit).map(|(_, path)| path).collect()
}

pub struct ImageSourceClient {
    transport: Arc<dyn HttpTransport>,
    image_dir: PathBuf,
    metadata_url: String,
    retry: RetryPolicy,
}

impl ImageSourceClient {
    pub fn new(transport: Arc<dyn HttpTransport>, image_dir: &Path) -> Self {
        Self {
            transport,
            image_dir: image_dir.to_path_buf(),
            metadata_url: BING_API.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_metadata_url(mut self, url: &str) -> Self {
        self.metadata_url = url.to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    pub fn local_path_for(&self, date_key: &str) -> PathBuf {
        self.image_dir.join(image_file_name(date_key))
    }

    /// Today's image, downloading it only if no verified copy is cached.
    pub fn fetch_today(&self, proxy: Option<&ProxySetting>) -> Result<DailyImage, FetchError> {
        let (remote_url, date_key) = self.fetch_metadata(proxy)?;
        let local_path = self.local_path_for(&date_key);

        if has_content(&local_path) {
            log::debug!("{} already cached", local_path.display());
        } else {
            self.download(&remote_url, &local_path, proxy)?;
            log::info!("Downloaded {}", local_path.display());
        }

        Ok(DailyImage {
            remote_url,
            date_key,
            local_path,
        })
    }

    pub fn fetch_metadata(&self, proxy: Option<&ProxySetting>) -> Result<(String, String), FetchError> {
        let response = self
            .retry
            .get(self.transport.as_ref(), &self.metadata_url, METADATA_TIMEOUT, proxy)?;
        let body = response
            .text()
            .map_err(|e| FetchError::MalformedResponse(format!("unreadable body: {}", e)))?;
        parse_metadata(&body)
    }

    /// Stream to `bing_<date>.tmp`, verify, then rename over the canonical
    /// path. On any failure the temp file is removed.
    fn download(&self, url: &str, target: &Path, proxy: Option<&ProxySetting>) -> Result<(), FetchError> {
        let mut response = self
            .retry
            .get(self.transport.as_ref(), url, DOWNLOAD_TIMEOUT, proxy)?;

        let is_image = response
            .content_type
            .as_deref()
            .map(|ct| ct.contains("image"))
            .unwrap_or(false);
        if !is_image {
            return Err(FetchError::NotAnImage {
                url: url.to_string(),
                content_type: response.content_type.take(),
            });
        }

        fs::create_dir_all(&self.image_dir).map_err(|source| FetchError::Io {
            path: self.image_dir.clone(),
            source,
        })?;

        let temp_path = target.with_extension("tmp");
        let result = write_body(&mut response.body, &temp_path)
            .map_err(|source| FetchError::Io {
                path: temp_path.clone(),
                source,
            })
            .and_then(|()| verify_image(&temp_path))
            .and_then(|()| {
                fs::rename(&temp_path, target).map_err(|source| FetchError::Io {
                    path: target.to_path_buf(),
                    source,
                })
            });

        if result.is_err() && temp_path.exists() {
            if let Err(e) = fs::remove_file(&temp_path) {
                log::warn!("Could not remove {}: {}", temp_path.display(), e);
            }
        }
        result
    }
}

fn write_body(body: &mut dyn io::Read, path: &Path) -> io::Result<()> {
    let mut file = File::create(path)?;
    io::copy(body, &mut file)?;
    file.flush()?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{png_bytes, Scripted, ScriptedTransport};
    use tempfile::tempdir;

    const METADATA: &str = r#"{"images":[{"url":"/th?id=X","startdate":"20240101"}]}"#;
    const IMAGE_URL: &str = "https://www.bing.com/th?id=X";

    fn client(transport: &Arc<ScriptedTransport>, dir: &Path) -> ImageSourceClient {
        ImageSourceClient::new(transport.clone(), dir)
            .with_retry(RetryPolicy::default().with_backoff(Duration::ZERO))
    }

    #[test]
    fn parses_relative_url_and_date() {
        let (url, date) = parse_metadata(METADATA).unwrap();
        assert_eq!(url, IMAGE_URL);
        assert_eq!(date, "20240101");
    }

    #[test]
    fn absolute_urls_are_kept() {
        let body = r#"{"images":[{"url":"https://cdn.example/x.jpg","startdate":"20240102"}]}"#;
        assert_eq!(parse_metadata(body).unwrap().0, "https://cdn.example/x.jpg");
    }

    #[test]
    fn missing_or_empty_images_means_no_image() {
        assert!(matches!(parse_metadata("{}"), Err(FetchError::NoImageAvailable)));
        assert!(matches!(
            parse_metadata(r#"{"images":[]}"#),
            Err(FetchError::NoImageAvailable)
        ));
    }

    #[test]
    fn broken_metadata_is_malformed() {
        assert!(matches!(parse_metadata("<html>"), Err(FetchError::MalformedResponse(_))));
        assert!(matches!(
            parse_metadata(r#"{"images":[{"startdate":"20240101"}]}"#),
            Err(FetchError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_metadata(r#"{"images":[{"url":"/th?id=X","startdate":"../../x"}]}"#),
            Err(FetchError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_metadata(r#"{"images":[{"url":"/th?id=X","startdate":"20241340"}]}"#),
            Err(FetchError::MalformedResponse(_))
        ));
    }

    #[test]
    fn downloads_into_canonical_path() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(BING_API, Scripted::json(METADATA));
        transport.push(IMAGE_URL, Scripted::image(png_bytes()));

        let image = client(&transport, dir.path()).fetch_today(None).unwrap();

        assert_eq!(image.date_key, "20240101");
        assert_eq!(image.local_path, dir.path().join("bing_20240101.jpg"));
        assert!(image.local_path.is_file());
        assert!(!dir.path().join("bing_20240101.tmp").exists());
    }

    #[test]
    fn cached_file_is_not_downloaded_again() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(BING_API, Scripted::json(METADATA));
        transport.push(BING_API, Scripted::json(METADATA));
        transport.push(IMAGE_URL, Scripted::image(png_bytes()));
        transport.push(IMAGE_URL, Scripted::image(png_bytes()));
        let client = client(&transport, dir.path());

        let first = client.fetch_today(None).unwrap();
        let second = client.fetch_today(None).unwrap();

        assert_eq!(first, second);
        assert_eq!(transport.calls_to(BING_API), 2);
        assert_eq!(transport.calls_to(IMAGE_URL), 1);
    }

    #[test]
    fn corrupt_download_leaves_no_file_and_is_retried_later() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(BING_API, Scripted::json(METADATA));
        transport.push(IMAGE_URL, Scripted::image(b"definitely not a jpeg".to_vec()));
        transport.push(BING_API, Scripted::json(METADATA));
        transport.push(IMAGE_URL, Scripted::image(png_bytes()));
        let client = client(&transport, dir.path());

        let err = client.fetch_today(None).unwrap_err();
        assert!(matches!(err, FetchError::CorruptImage { .. }));
        assert!(err.is_download_failure());
        assert!(!dir.path().join("bing_20240101.jpg").exists());
        assert!(!dir.path().join("bing_20240101.tmp").exists());

        let image = client.fetch_today(None).unwrap();
        assert!(image.local_path.is_file());
        assert_eq!(transport.calls_to(IMAGE_URL), 2);
    }

    #[test]
    fn truncated_image_is_corrupt() {
        let dir = tempdir().unwrap();
        let mut bytes = png_bytes();
        bytes.truncate(bytes.len() / 2);
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(BING_API, Scripted::json(METADATA));
        transport.push(IMAGE_URL, Scripted::image(bytes));

        let err = client(&transport, dir.path()).fetch_today(None).unwrap_err();

        assert!(matches!(err, FetchError::CorruptImage { .. }));
        assert!(!dir.path().join("bing_20240101.jpg").exists());
    }

    #[test]
    fn non_image_content_type_is_rejected() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(BING_API, Scripted::json(METADATA));
        transport.push(IMAGE_URL, Scripted::json("{\"error\": true}"));

        let err = client(&transport, dir.path()).fetch_today(None).unwrap_err();

        assert!(matches!(err, FetchError::NotAnImage { .. }));
        assert!(!dir.path().join("bing_20240101.jpg").exists());
    }

    #[test]
    fn empty_cached_file_is_replaced() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("bing_20240101.jpg"), b"").unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(BING_API, Scripted::json(METADATA));
        transport.push(IMAGE_URL, Scripted::image(png_bytes()));

        let image = client(&transport, dir.path()).fetch_today(None).unwrap();

        assert!(fs::metadata(&image.local_path).unwrap().len() > 0);
        assert_eq!(transport.calls_to(IMAGE_URL), 1);
    }

    #[test]
    fn proxy_is_used_for_every_request() {
        let dir = tempdir().unwrap();
        let proxy = ProxySetting::new("proxy.corp.com", "8080");
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(BING_API, Scripted::json(METADATA));
        transport.push(IMAGE_URL, Scripted::image(png_bytes()));

        client(&transport, dir.path()).fetch_today(Some(&proxy)).unwrap();

        assert_eq!(
            transport.proxies_used(),
            vec![Some(proxy.clone()), Some(proxy)]
        );
    }

    #[test]
    fn gallery_lists_only_daily_images() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("bing_20240101.jpg"), b"a").unwrap();
        fs::write(dir.path().join("bing_20240102.jpg"), b"b").unwrap();
        fs::write(dir.path().join("bing_20240103.tmp"), b"c").unwrap();
        fs::write(dir.path().join("holiday.jpg"), b"d").unwrap();
        fs::write(dir.path().join("bing_20240104.jpg"), b"").unwrap();

        let listed = list_cached_images(dir.path(), 15);

        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|p| p.extension().unwrap() == "jpg"));
        assert_eq!(list_cached_images(dir.path(), 1).len(), 1);
        assert!(list_cached_images(&dir.path().join("missing"), 15).is_empty());
    }
}
