//! Blocking HTTP GET behind a trait, plus the shared retry policy.
//!
//! Everything that talks to the network (metadata, image download, PAC
//! script) goes through [`HttpTransport`], so tests can script responses
//! without a socket.

use std::io::{self, Read};
use std::thread;
use std::time::Duration;

use attohttpc::header;
use rand::Rng;
use thiserror::Error;

use crate::error::FetchError;
use crate::proxy::ProxySetting;

const USER_AGENT: &str = concat!("BingDaily/", env!("CARGO_PKG_VERSION"));

/// A connection-level failure: DNS, TLS, refused, timed out.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Box<dyn Read>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(mut self) -> io::Result<String> {
        let mut text = String::new();
        self.body.read_to_string(&mut text)?;
        Ok(text)
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

pub trait HttpTransport: Send + Sync {
    /// Issue a single GET. `proxy = None` means a direct connection.
    fn get(
        &self,
        url: &str,
        timeout: Duration,
        proxy: Option<&ProxySetting>,
    ) -> Result<HttpResponse, TransportError>;
}

/// Production transport backed by `attohttpc`.
#[derive(Debug, Default, Clone)]
pub struct AttoTransport;

impl AttoTransport {
    pub fn new() -> Self {
        Self
    }

    fn proxy_settings(proxy: Option<&ProxySetting>) -> Result<attohttpc::ProxySettings, TransportError> {
        let Some(proxy) = proxy else {
            // empty settings: don't let attohttpc pick up *_PROXY on its own
            return Ok(attohttpc::ProxySettings::builder().build());
        };
        let proxy_url = url::Url::parse(&proxy.to_url())
            .map_err(|e| TransportError(format!("invalid proxy {}: {}", proxy, e)))?;
        Ok(attohttpc::ProxySettings::builder()
            .http_proxy(proxy_url.clone())
            .https_proxy(proxy_url)
            .build())
    }
}

impl HttpTransport for AttoTransport {
    fn get(
        &self,
        url: &str,
        timeout: Duration,
        proxy: Option<&ProxySetting>,
    ) -> Result<HttpResponse, TransportError> {
        let response = attohttpc::get(url)
            .header(header::USER_AGENT, USER_AGENT)
            .timeout(timeout)
            .proxy_settings(Self::proxy_settings(proxy)?)
            .send()
            .map_err(|e| TransportError(e.to_string()))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let (_, _, reader) = response.split();

        Ok(HttpResponse {
            status,
            content_type,
            body: Box::new(reader),
        })
    }
}

/// Bounded retry with exponential backoff for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            retry_statuses: vec![500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry` plus up
    /// to a quarter of `base` of jitter.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base_ms = self.backoff_base.as_millis() as u64;
        let exp_ms = base_ms.saturating_mul(1_u64 << retry.min(16));
        let jitter_ms = rand::thread_rng().gen_range(0..=base_ms / 4);
        Duration::from_millis(exp_ms.saturating_add(jitter_ms))
    }

    /// GET `url`, retrying retryable statuses and connection failures.
    /// Only a 2xx response is returned as `Ok`.
    pub fn get(
        &self,
        transport: &dyn HttpTransport,
        url: &str,
        timeout: Duration,
        proxy: Option<&ProxySetting>,
    ) -> Result<HttpResponse, FetchError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let reason = match transport.get(url, timeout, proxy) {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) if self.retry_statuses.contains(&response.status) => {
                    format!("HTTP {}", response.status)
                }
                Ok(response) => {
                    return Err(FetchError::HttpStatus {
                        url: url.to_string(),
                        status: response.status,
                    })
                }
                Err(e) => e.to_string(),
            };

            if attempts > self.max_retries {
                return Err(FetchError::TransientNetwork {
                    url: url.to_string(),
                    attempts,
                    reason,
                });
            }

            let delay = self.delay_for(attempts - 1);
            log::warn!(
                "{} from {}, retry {}/{} in {:?}",
                reason,
                url,
                attempts,
                self.max_retries,
                delay
            );
            thread::sleep(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Scripted, ScriptedTransport};

    const URL: &str = "https://www.bing.com/HPImageArchive.aspx";

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::default().with_backoff(Duration::ZERO)
    }

    #[test]
    fn three_503s_then_success_is_a_success() {
        let transport = ScriptedTransport::new();
        for _ in 0..3 {
            transport.push(URL, Scripted::Status(503));
        }
        transport.push(URL, Scripted::json("{}"));

        let response = fast_policy()
            .get(&transport, URL, Duration::from_secs(10), None)
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.calls_to(URL), 4);
    }

    #[test]
    fn fourth_503_exhausts_the_retries() {
        let transport = ScriptedTransport::new();
        for _ in 0..4 {
            transport.push(URL, Scripted::Status(503));
        }
        transport.push(URL, Scripted::json("{}"));

        let err = fast_policy()
            .get(&transport, URL, Duration::from_secs(10), None)
            .unwrap_err();

        match err {
            FetchError::TransientNetwork { attempts, reason, .. } => {
                assert_eq!(attempts, 4);
                assert_eq!(reason, "HTTP 503");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.calls_to(URL), 4);
    }

    #[test]
    fn client_errors_are_not_retried() {
        let transport = ScriptedTransport::new();
        transport.push(URL, Scripted::Status(404));

        let err = fast_policy()
            .get(&transport, URL, Duration::from_secs(10), None)
            .unwrap_err();

        assert!(matches!(err, FetchError::HttpStatus { status: 404, .. }));
        assert_eq!(transport.calls_to(URL), 1);
    }

    #[test]
    fn connection_failures_are_retried() {
        let transport = ScriptedTransport::new();
        transport.push(URL, Scripted::Fail("connection refused".into()));
        transport.push(URL, Scripted::json("{}"));

        let response = fast_policy()
            .get(&transport, URL, Duration::from_secs(10), None)
            .unwrap();

        assert!(response.is_success());
        assert_eq!(transport.calls_to(URL), 2);
    }

    #[test]
    fn backoff_doubles_per_retry() {
        let policy = RetryPolicy::default().with_backoff(Duration::from_millis(100));
        let first = policy.delay_for(0);
        let third = policy.delay_for(2);

        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(125));
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(425));
    }

    #[test]
    fn unset_proxy_means_direct_settings() {
        assert!(AttoTransport::proxy_settings(None).is_ok());
        let proxy = ProxySetting::new("proxy.corp.com", "8080");
        assert!(AttoTransport::proxy_settings(Some(&proxy)).is_ok());
    }
}
