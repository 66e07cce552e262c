use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Service trait for the OS wallpaper call
pub trait WallpaperService: Send + Sync {
    /// Set wallpaper from an absolute file path
    fn set_wallpaper_from_path(&self, file_path: &Path) -> Result<()>;
}

impl<T: WallpaperService + ?Sized> WallpaperService for Arc<T> {
    fn set_wallpaper_from_path(&self, file_path: &Path) -> Result<()> {
        (**self).set_wallpaper_from_path(file_path)
    }
}

/// Desktop wallpaper through the `wallpaper` crate (`SystemParametersInfoW`
/// on Windows).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemWallpaper;

impl WallpaperService for SystemWallpaper {
    fn set_wallpaper_from_path(&self, file_path: &Path) -> Result<()> {
        let file_loc = file_path
            .to_str()
            .with_context(|| format!("wallpaper path is not valid UTF-8: {}", file_path.display()))?;
        wallpaper::set_from_path(file_loc)
            .map_err(|e| anyhow::anyhow!("Failed to set wallpaper {}: {}", file_loc, e))
    }
}

/// In-memory record of what is on screen and when we last looked for a new
/// image. Not persisted; a restart begins with a forced check.
#[derive(Debug, Default, Clone)]
pub struct AppliedWallpaperState {
    pub current_path: Option<PathBuf>,
    pub last_check: Option<std::time::Instant>,
}

/// Applies verified images, skipping the OS call when nothing changed.
pub struct WallpaperApplicator {
    service: Box<dyn WallpaperService>,
}

impl WallpaperApplicator {
    pub fn new(service: impl WallpaperService + 'static) -> Self {
        Self {
            service: Box::new(service),
        }
    }

    /// Apply `path` when `force` is set or it differs from what is current.
    /// Returns whether the OS call was made.
    pub fn apply(&self, state: &mut AppliedWallpaperState, path: &Path, force: bool) -> Result<bool> {
        if !force && state.current_path.as_deref() == Some(path) {
            return Ok(false);
        }
        if !path.is_file() {
            anyhow::bail!("wallpaper image does not exist: {}", path.display());
        }

        log::info!("Setting wallpaper: {}", path.display());
        self.service.set_wallpaper_from_path(path)?;
        state.current_path = Some(path.to_path_buf());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingWallpaper;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn same_path_without_force_is_not_reapplied() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bing_20240101.jpg");
        fs::write(&path, b"x").unwrap();
        let service = Arc::new(RecordingWallpaper::new());
        let applicator = WallpaperApplicator::new(Arc::clone(&service));
        let mut state = AppliedWallpaperState {
            current_path: Some(path.clone()),
            last_check: None,
        };

        assert!(!applicator.apply(&mut state, &path, false).unwrap());
        assert_eq!(service.applied_count(), 0);
    }

    #[test]
    fn force_reapplies_the_same_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bing_20240101.jpg");
        fs::write(&path, b"x").unwrap();
        let service = Arc::new(RecordingWallpaper::new());
        let applicator = WallpaperApplicator::new(Arc::clone(&service));
        let mut state = AppliedWallpaperState {
            current_path: Some(path.clone()),
            last_check: None,
        };

        assert!(applicator.apply(&mut state, &path, true).unwrap());
        assert_eq!(service.applied_count(), 1);
    }

    #[test]
    fn new_path_is_applied_and_recorded() {
        let dir = tempdir().unwrap();
        let old = dir.path().join("bing_20231231.jpg");
        let new = dir.path().join("bing_20240101.jpg");
        fs::write(&new, b"x").unwrap();
        let service = Arc::new(RecordingWallpaper::new());
        let applicator = WallpaperApplicator::new(Arc::clone(&service));
        let mut state = AppliedWallpaperState {
            current_path: Some(old),
            last_check: None,
        };

        assert!(applicator.apply(&mut state, &new, false).unwrap());
        assert_eq!(state.current_path.as_deref(), Some(new.as_path()));
        assert_eq!(*service.applied.lock().unwrap(), vec![new]);
    }

    #[test]
    fn failed_os_call_leaves_current_path_alone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bing_20240101.jpg");
        fs::write(&path, b"x").unwrap();
        let applicator = WallpaperApplicator::new(RecordingWallpaper {
            should_fail: true,
            ..RecordingWallpaper::default()
        });
        let mut state = AppliedWallpaperState::default();

        assert!(applicator.apply(&mut state, &path, true).is_err());
        assert_eq!(state.current_path, None);
    }

    #[test]
    fn missing_file_is_refused() {
        let dir = tempdir().unwrap();
        let service = Arc::new(RecordingWallpaper::new());
        let applicator = WallpaperApplicator::new(Arc::clone(&service));
        let mut state = AppliedWallpaperState::default();

        assert!(applicator
            .apply(&mut state, &dir.path().join("missing.jpg"), true)
            .is_err());
        assert_eq!(service.applied_count(), 0);
    }
}
