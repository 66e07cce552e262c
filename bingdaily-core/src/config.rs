use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use directories::UserDirs;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::proxy::ProxySetting;

pub const APP_NAME: &str = "BingWallpaper";
pub const DEFAULT_INTERVAL_MINUTES: u32 = 720;
/// Upper bound accepted for a custom interval (one week).
pub const MAX_INTERVAL_MINUTES: u32 = 10_080;

pub const INTERVAL_PRESETS: &[(&str, u32)] = &[
    ("15 Minutes", 15),
    ("30 Minutes", 30),
    ("1 Hour", 60),
    ("4 Hours", 240),
    ("6 Hours", 360),
    ("12 Hours", 720),
    ("24 Hours", 1440),
    ("Disabled", 0),
];

/// Per-user locations, resolved once at startup and handed to every
/// component that touches the disk.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub config_file: PathBuf,
    pub image_dir: PathBuf,
}

impl AppPaths {
    pub fn discover() -> Result<Self, ConfigError> {
        let data_dir = {
            #[cfg(target_os = "windows")]
            {
                // %LOCALAPPDATA%\Programs\BingWallpaper, shared with the installer
                let base = directories::BaseDirs::new().ok_or(ConfigError::NoHomeDir)?;
                base.data_local_dir().join("Programs").join(APP_NAME)
            }

            #[cfg(not(target_os = "windows"))]
            {
                directories::ProjectDirs::from("com", "bingdaily", APP_NAME)
                    .ok_or(ConfigError::NoHomeDir)?
                    .data_local_dir()
                    .to_path_buf()
            }
        };

        let image_dir = UserDirs::new()
            .and_then(|dirs| dirs.picture_dir().map(|p| p.join("Bing")))
            .unwrap_or_else(|| data_dir.join("images"));

        Ok(Self::with_dirs(data_dir, image_dir))
    }

    /// Lay everything out under `root`. Used by tests and portable setups.
    pub fn at(root: &Path) -> Self {
        Self::with_dirs(root.join("data"), root.join("images"))
    }

    fn with_dirs(data_dir: PathBuf, image_dir: PathBuf) -> Self {
        Self {
            log_dir: data_dir.join("logs"),
            config_file: data_dir.join("config.json"),
            data_dir,
            image_dir,
        }
    }

    pub fn ensure_dirs(&self) -> Result<(), ConfigError> {
        for dir in [&self.data_dir, &self.log_dir, &self.image_dir] {
            fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

/// The persisted `config.json` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub check_interval_minutes: u32,
    #[serde(rename = "proxy_url")]
    pub proxy_host: String,
    pub proxy_port: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            check_interval_minutes: DEFAULT_INTERVAL_MINUTES,
            proxy_host: String::new(),
            proxy_port: String::new(),
        }
    }
}

impl Settings {
    /// The configured proxy, if both halves are present.
    pub fn proxy(&self) -> Option<ProxySetting> {
        let host = self.proxy_host.trim();
        let port = self.proxy_port.trim();
        if host.is_empty() || port.is_empty() {
            return None;
        }
        Some(ProxySetting::new(host, port))
    }

    pub fn interval_label(&self) -> String {
        interval_label(self.check_interval_minutes)
    }
}

/// Menu label for an interval, e.g. "12 Hours" or "Custom (90 min)".
pub fn interval_label(minutes: u32) -> String {
    INTERVAL_PRESETS
        .iter()
        .find(|(_, mins)| *mins == minutes)
        .map(|(label, _)| label.to_string())
        .unwrap_or_else(|| format!("Custom ({} min)", minutes))
}

pub fn read_settings(path: &Path) -> Result<Settings, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Write through a sibling temp file so a crash never leaves half a config.
pub fn write_settings(path: &Path, settings: &Settings) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let payload = serde_json::to_string_pretty(settings).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, payload).map_err(io_err)?;
    fs::rename(&tmp_path, path).map_err(io_err)?;
    Ok(())
}

/// File-backed settings shared between the scheduler and the foreground.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    settings: Mutex<Settings>,
}

impl ConfigStore {
    /// Load the config, creating it with defaults when absent. A file that
    /// can't be read or parsed is logged and replaced by defaults for this
    /// session only; it is not overwritten until the next mutation.
    pub fn load(path: &Path) -> Self {
        let settings = if path.exists() {
            match read_settings(path) {
                Ok(settings) => settings,
                Err(e) => {
                    log::error!("Error loading config: {}", e);
                    Settings::default()
                }
            }
        } else {
            let settings = Settings::default();
            match write_settings(path, &settings) {
                Ok(()) => log::info!("Created default config at {}", path.display()),
                Err(e) => log::error!("Error saving config: {}", e),
            }
            settings
        };

        Self::in_memory(path, settings)
    }

    pub fn in_memory(path: &Path, settings: Settings) -> Self {
        Self {
            path: path.to_path_buf(),
            settings: Mutex::new(settings),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Settings {
        self.lock().clone()
    }

    pub fn check_interval_minutes(&self) -> u32 {
        self.lock().check_interval_minutes
    }

    pub fn proxy(&self) -> Option<ProxySetting> {
        self.lock().proxy()
    }

    pub fn set_check_interval(&self, minutes: u32) -> Result<(), ConfigError> {
        self.update(|s| s.check_interval_minutes = minutes)
    }

    pub fn set_proxy(&self, proxy: Option<&ProxySetting>) -> Result<(), ConfigError> {
        self.update(|s| match proxy {
            Some(p) => {
                s.proxy_host = p.host.clone();
                s.proxy_port = p.port.clone();
            }
            None => {
                s.proxy_host.clear();
                s.proxy_port.clear();
            }
        })
    }

    /// Mutate in memory, then persist. The in-memory value is kept even if
    /// the write fails.
    fn update(&self, change: impl FnOnce(&mut Settings)) -> Result<(), ConfigError> {
        let snapshot = {
            let mut settings = self.lock();
            change(&mut settings);
            settings.clone()
        };
        write_settings(&self.path, &snapshot)
    }

    fn lock(&self) -> MutexGuard<'_, Settings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
