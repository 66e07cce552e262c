//! The polling loop that decides when to look for a new daily image.
//!
//! A check runs the whole pipeline: resolve proxy, fetch metadata, download
//! and verify, apply, publish the outcome, then stamp `last_check`. Checks
//! never overlap; a forced check started while a scheduled one is running
//! waits for it.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::{interval_label, ConfigStore};
use crate::error::{ConfigError, UpdateError};
use crate::proxy::ProxyResolver;
use crate::source::{DailyImage, ImageSourceClient};
use crate::wallpaper::{AppliedWallpaperState, WallpaperApplicator};

pub const POLL_PERIOD: Duration = Duration::from_secs(5);

/// Messages from the background scheduler to whoever owns the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    CheckStarted { forced: bool },
    WallpaperApplied(PathBuf),
    WallpaperUnchanged(PathBuf),
    CheckFailed(String),
    /// A gallery selection could not be put on screen.
    ApplyFailed(String),
    IntervalChanged(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The OS wallpaper call was made.
    Applied(DailyImage),
    /// Today's image is already on screen.
    Unchanged(DailyImage),
}

impl CheckOutcome {
    pub fn image(&self) -> &DailyImage {
        match self {
            CheckOutcome::Applied(image) | CheckOutcome::Unchanged(image) => image,
        }
    }
}

pub struct UpdateScheduler {
    config: Arc<ConfigStore>,
    resolver: ProxyResolver,
    client: ImageSourceClient,
    applicator: WallpaperApplicator,
    state: Mutex<AppliedWallpaperState>,
    check_lock: Mutex<()>,
    /// Bumped by `set_interval`; a check that sees it move does not stamp.
    interval_epoch: AtomicU64,
    running: AtomicBool,
    poll_period: Duration,
    events: Option<Sender<SchedulerEvent>>,
}

impl UpdateScheduler {
    pub fn new(
        config: Arc<ConfigStore>,
        resolver: ProxyResolver,
        client: ImageSourceClient,
        applicator: WallpaperApplicator,
    ) -> Self {
        Self {
            config,
            resolver,
            client,
            applicator,
            state: Mutex::new(AppliedWallpaperState::default()),
            check_lock: Mutex::new(()),
            interval_epoch: AtomicU64::new(0),
            running: AtomicBool::new(true),
            poll_period: POLL_PERIOD,
            events: None,
        }
    }

    pub fn with_poll_period(mut self, poll_period: Duration) -> Self {
        self.poll_period = poll_period;
        self
    }

    pub fn with_events(mut self, events: Sender<SchedulerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn resolver(&self) -> &ProxyResolver {
        &self.resolver
    }

    pub fn image_dir(&self) -> &Path {
        self.client.image_dir()
    }

    pub fn state(&self) -> AppliedWallpaperState {
        self.lock_state().clone()
    }

    pub fn current_path(&self) -> Option<PathBuf> {
        self.lock_state().current_path.clone()
    }

    /// Whether a scheduled check is due at `now`. Never true while the
    /// interval is 0 (disabled).
    pub fn is_due(&self, now: Instant) -> bool {
        let minutes = self.config.check_interval_minutes();
        if minutes == 0 {
            return false;
        }
        let interval = Duration::from_secs(u64::from(minutes) * 60);
        match self.lock_state().last_check {
            None => true,
            Some(last) => now.saturating_duration_since(last) > interval,
        }
    }

    /// One iteration of the polling loop. Returns `None` when no check was
    /// due.
    pub fn tick(&self, now: Instant) -> Option<Result<CheckOutcome, UpdateError>> {
        let _guard = self.lock_checks();
        if !self.is_due(now) {
            return None;
        }
        Some(self.check_locked(false))
    }

    /// Run the pipeline now, bypassing the interval gate.
    pub fn check(&self, force: bool) -> Result<CheckOutcome, UpdateError> {
        let _guard = self.lock_checks();
        self.check_locked(force)
    }

    fn check_locked(&self, force: bool) -> Result<CheckOutcome, UpdateError> {
        let epoch = self.interval_epoch.load(Ordering::SeqCst);
        self.publish(SchedulerEvent::CheckStarted { forced: force });
        let result = self.run_pipeline(force);

        match &result {
            Ok(CheckOutcome::Applied(image)) => {
                self.publish(SchedulerEvent::WallpaperApplied(image.local_path.clone()));
            }
            Ok(CheckOutcome::Unchanged(image)) => {
                log::debug!("Wallpaper unchanged: {}", image.local_path.display());
                self.publish(SchedulerEvent::WallpaperUnchanged(image.local_path.clone()));
            }
            Err(e) => {
                log::error!("Update check failed: {}", e);
                self.publish(SchedulerEvent::CheckFailed(e.to_string()));
            }
        }

        // stamped whatever happened, so a failing source can't cause a retry
        // storm; an interval change made meanwhile keeps the next tick due
        let mut state = self.lock_state();
        if self.interval_epoch.load(Ordering::SeqCst) == epoch {
            state.last_check = Some(Instant::now());
        } else {
            log::debug!("Interval changed during the check, next tick rechecks");
        }
        drop(state);
        result
    }

    fn run_pipeline(&self, force: bool) -> Result<CheckOutcome, UpdateError> {
        let proxy = self.resolver.resolve();
        let image = self.client.fetch_today(proxy.as_ref())?;

        let mut state = self.lock_state();
        let applied = self
            .applicator
            .apply(&mut state, &image.local_path, force)
            .map_err(|e| UpdateError::Apply {
                path: image.local_path.clone(),
                reason: format!("{:#}", e),
            })?;

        Ok(if applied {
            CheckOutcome::Applied(image)
        } else {
            CheckOutcome::Unchanged(image)
        })
    }

    /// Put an already cached image on screen (gallery selection).
    pub fn apply_path(&self, path: &Path) -> Result<(), UpdateError> {
        let _guard = self.lock_checks();
        let mut state = self.lock_state();
        self.applicator
            .apply(&mut state, path, true)
            .map_err(|e| UpdateError::Apply {
                path: path.to_path_buf(),
                reason: format!("{:#}", e),
            })?;
        drop(state);
        self.publish(SchedulerEvent::WallpaperApplied(path.to_path_buf()));
        Ok(())
    }

    /// Change the polling interval. The new value is live immediately and
    /// the next tick rechecks; the error only reports a failed save.
    pub fn set_interval(&self, minutes: u32) -> Result<(), ConfigError> {
        log::info!(
            "Setting interval to: {} ({} minutes)",
            interval_label(minutes),
            minutes
        );

        let saved = self.config.set_check_interval(minutes);
        let mut state = self.lock_state();
        self.interval_epoch.fetch_add(1, Ordering::SeqCst);
        state.last_check = None;
        drop(state);
        self.publish(SchedulerEvent::IntervalChanged(minutes));
        saved
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Startup check, then poll until [`request_stop`](Self::request_stop).
    pub fn run(&self) {
        log::info!("Scheduler started, polling every {:?}", self.poll_period);
        if self.is_running() {
            // errors are logged inside; the loop goes on regardless
            let _ = self.check(true);
        }
        while self.is_running() {
            let _ = self.tick(Instant::now());
            thread::sleep(self.poll_period);
        }
        log::info!("Scheduler stopped");
    }

    pub fn spawn(self: &Arc<Self>) -> io::Result<JoinHandle<()>> {
        let scheduler = Arc::clone(self);
        thread::Builder::new()
            .name("scheduler".into())
            .spawn(move || scheduler.run())
    }

    /// Forced check on a short-lived thread (tray "Check Now").
    pub fn spawn_check_now(self: &Arc<Self>) -> io::Result<JoinHandle<()>> {
        let scheduler = Arc::clone(self);
        thread::Builder::new().name("check-now".into()).spawn(move || {
            let _ = scheduler.check(true);
        })
    }

    /// Gallery selection on a short-lived thread. The caller never waits
    /// for a check in flight; a failure arrives as `ApplyFailed`.
    pub fn spawn_apply_path(self: &Arc<Self>, path: PathBuf) -> io::Result<JoinHandle<()>> {
        let scheduler = Arc::clone(self);
        thread::Builder::new().name("apply-image".into()).spawn(move || {
            if let Err(e) = scheduler.apply_path(&path) {
                log::error!("Failed to set wallpaper: {}", e);
                scheduler.publish(SchedulerEvent::ApplyFailed(e.to_string()));
            }
        })
    }

    fn publish(&self, event: SchedulerEvent) {
        if let Some(events) = &self.events {
            // the receiver may be gone during shutdown
            let _ = events.send(event);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, AppliedWallpaperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_checks(&self) -> MutexGuard<'_, ()> {
        self.check_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
