//! Core of the Bing daily wallpaper updater: configuration, proxy
//! resolution, the image pipeline and the scheduler that drives it.

pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod proxy;
pub mod scheduler;
pub mod source;
pub mod wallpaper;

#[cfg(test)]
mod testing;

pub use config::{AppPaths, ConfigStore, Settings, INTERVAL_PRESETS};
pub use error::{ConfigError, FetchError, UpdateError};
pub use http::{AttoTransport, HttpTransport, RetryPolicy};
pub use proxy::{ProxyResolver, ProxySetting, SystemProxyDiscovery};
pub use scheduler::{CheckOutcome, SchedulerEvent, UpdateScheduler};
pub use source::{DailyImage, ImageSourceClient};
pub use wallpaper::{AppliedWallpaperState, SystemWallpaper, WallpaperApplicator, WallpaperService};
