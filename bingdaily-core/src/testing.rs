//! In-memory doubles shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::http::{HttpResponse, HttpTransport, TransportError};
use crate::proxy::{ProxyDiscovery, ProxySetting};
use crate::wallpaper::WallpaperService;

#[derive(Debug, Clone)]
pub enum Scripted {
    Ok {
        status: u16,
        content_type: Option<String>,
        body: Vec<u8>,
    },
    Status(u16),
    Fail(String),
}

impl Scripted {
    pub fn json(body: &str) -> Self {
        Scripted::Ok {
            status: 200,
            content_type: Some("application/json; charset=utf-8".into()),
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn text(body: &str) -> Self {
        Scripted::Ok {
            status: 200,
            content_type: Some("application/x-ns-proxy-autoconfig".into()),
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn image(body: Vec<u8>) -> Self {
        Scripted::Ok {
            status: 200,
            content_type: Some("image/jpeg".into()),
            body,
        }
    }
}

/// Replays queued responses per URL and records every request.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<(String, Option<ProxySetting>)>>,
    delay: Mutex<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, url: &str, response: Scripted) {
        self.responses
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    /// Make every later request take this long.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(u, _)| u == url).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn proxies_used(&self) -> Vec<Option<ProxySetting>> {
        self.calls.lock().unwrap().iter().map(|(_, p)| p.clone()).collect()
    }
}

impl HttpTransport for ScriptedTransport {
    fn get(
        &self,
        url: &str,
        _timeout: Duration,
        proxy: Option<&ProxySetting>,
    ) -> Result<HttpResponse, TransportError> {
        self.calls.lock().unwrap().push((url.to_string(), proxy.cloned()));
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let next = self
            .responses
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|queue| queue.pop_front());

        match next {
            Some(Scripted::Ok { status, content_type, body }) => Ok(HttpResponse {
                status,
                content_type,
                body: Box::new(Cursor::new(body)),
            }),
            Some(Scripted::Status(status)) => Ok(HttpResponse {
                status,
                content_type: Some("text/html".into()),
                body: Box::new(Cursor::new(Vec::new())),
            }),
            Some(Scripted::Fail(reason)) => Err(TransportError(reason)),
            None => Err(TransportError(format!("no scripted response for {url}"))),
        }
    }
}

/// Records every path handed to the OS wallpaper call.
#[derive(Default)]
pub struct RecordingWallpaper {
    pub applied: Mutex<Vec<PathBuf>>,
    pub should_fail: bool,
}

impl RecordingWallpaper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied_count(&self) -> usize {
        self.applied.lock().unwrap().len()
    }
}

impl WallpaperService for RecordingWallpaper {
    fn set_wallpaper_from_path(&self, file_path: &Path) -> anyhow::Result<()> {
        if self.should_fail {
            anyhow::bail!("wallpaper API rejected {}", file_path.display());
        }
        self.applied.lock().unwrap().push(file_path.to_path_buf());
        Ok(())
    }
}

/// Discovery that never finds a proxy.
pub struct NoDiscovery;

impl ProxyDiscovery for NoDiscovery {
    fn discover(&self) -> Option<ProxySetting> {
        None
    }
}

/// A tiny but genuinely decodable PNG.
pub fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(4, 3, image::Rgb([0, 120, 215]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}
