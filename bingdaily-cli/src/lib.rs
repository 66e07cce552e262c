pub use crate::app::{
    custom_interval_label, describe_last_check, prompt_custom_interval, validate_interval,
    BingDailyApp, GALLERY_SIZE,
};

pub mod install;

mod app {
    use anyhow::{bail, Context, Result};
    use bingdaily_core::config::{interval_label, MAX_INTERVAL_MINUTES};
    use bingdaily_core::source::list_cached_images;
    use bingdaily_core::*;
    use chrono::Local;
    use std::io::{self, BufRead, Write};
    use std::path::{Path, PathBuf};
    use std::sync::mpsc::{self, Receiver};
    use std::sync::Arc;
    use std::thread::JoinHandle;
    use std::time::Instant;

    /// Number of cached images offered in the gallery.
    pub const GALLERY_SIZE: usize = 15;

    /// Wires the core components together and drives them from a front end.
    pub struct BingDailyApp {
        paths: AppPaths,
        scheduler: Arc<UpdateScheduler>,
        events: Option<Receiver<SchedulerEvent>>,
    }

    impl BingDailyApp {
        pub fn new() -> Result<Self> {
            let paths = AppPaths::discover()?;
            Self::with_paths(paths)
        }

        /// Production wiring: attohttpc transport, registry/PAC/env proxy
        /// discovery and the OS wallpaper call.
        pub fn with_paths(paths: AppPaths) -> Result<Self> {
            paths.ensure_dirs()?;
            let config = Arc::new(ConfigStore::load(&paths.config_file));
            let transport: Arc<dyn HttpTransport> = Arc::new(AttoTransport::new());
            let resolver = ProxyResolver::new(
                Arc::clone(&config),
                SystemProxyDiscovery::new(Arc::clone(&transport)),
            );
            let client = ImageSourceClient::new(transport, &paths.image_dir);
            let applicator = WallpaperApplicator::new(SystemWallpaper);

            let (tx, rx) = mpsc::channel();
            let scheduler = UpdateScheduler::new(config, resolver, client, applicator).with_events(tx);
            Ok(Self::from_parts(paths, scheduler, rx))
        }

        pub fn from_parts(
            paths: AppPaths,
            scheduler: UpdateScheduler,
            events: Receiver<SchedulerEvent>,
        ) -> Self {
            Self {
                paths,
                scheduler: Arc::new(scheduler),
                events: Some(events),
            }
        }

        pub fn paths(&self) -> &AppPaths {
            &self.paths
        }

        pub fn scheduler(&self) -> &Arc<UpdateScheduler> {
            &self.scheduler
        }

        /// Hand the event stream to another owner (the tray event loop).
        pub fn take_events(&mut self) -> Option<Receiver<SchedulerEvent>> {
            self.events.take()
        }

        pub fn start_background(&self) -> Result<JoinHandle<()>> {
            self.scheduler
                .spawn()
                .context("Failed to start scheduler thread")
        }

        pub fn shutdown(&self) {
            self.scheduler.request_stop();
        }

        pub fn check_now(&self) -> Result<CheckOutcome> {
            Ok(self.scheduler.check(true)?)
        }

        pub fn set_interval(&self, minutes: u32) -> Result<()> {
            let minutes = validate_interval(minutes)?;
            if let Err(e) = self.scheduler.set_interval(minutes) {
                // the new interval is live for this session either way
                log::error!("Failed to save config: {}", e);
            }
            Ok(())
        }

        pub fn interval_minutes(&self) -> u32 {
            self.scheduler.config().check_interval_minutes()
        }

        /// Run discovery now and persist whatever it finds.
        pub fn detect_proxy(&self) -> Option<ProxySetting> {
            self.scheduler.resolver().detect_and_save()
        }

        pub fn gallery(&self) -> Vec<PathBuf> {
            list_cached_images(&self.paths.image_dir, GALLERY_SIZE)
        }

        pub fn apply_gallery_image(&self, path: &Path) -> Result<()> {
            Ok(self.scheduler.apply_path(path)?)
        }

        pub fn open_image_folder(&self) -> Result<()> {
            open::that(&self.paths.image_dir).with_context(|| {
                format!("Failed to open {}", self.paths.image_dir.display())
            })
        }

        pub fn get_current_image_title(&self) -> String {
            match self.scheduler.current_path() {
                Some(path) => {
                    let name = path
                        .file_name()
                        .and_then(|s| s.to_str())
                        .unwrap_or("(unnamed)");
                    if name.chars().count() > 30 {
                        format!("{}...", name.chars().take(30).collect::<String>())
                    } else {
                        name.to_string()
                    }
                }
                None => "(no image)".to_string(),
            }
        }

        pub fn last_check_text(&self) -> String {
            describe_last_check(self.scheduler.state().last_check, Instant::now())
        }

        pub fn proxy_text(&self) -> String {
            self.scheduler
                .config()
                .proxy()
                .map(|proxy| proxy.to_string())
                .unwrap_or_else(|| "direct".to_string())
        }

        pub fn status_lines(&self) -> Vec<String> {
            vec![
                format!("Current wallpaper: {}", self.get_current_image_title()),
                format!("Last check: {}", self.last_check_text()),
                format!("Interval: {}", interval_label(self.interval_minutes())),
                format!("Proxy: {}", self.proxy_text()),
                format!("Image folder: {}", self.paths.image_dir.display()),
            ]
        }

        fn print_events(&self, out: &mut impl Write) -> io::Result<()> {
            let Some(events) = &self.events else {
                return Ok(());
            };
            for event in events.try_iter() {
                match event {
                    SchedulerEvent::WallpaperApplied(path) => {
                        writeln!(out, "Set wallpaper: {}", path.display())?
                    }
                    SchedulerEvent::CheckFailed(reason) => {
                        writeln!(out, "Update check failed: {}", reason)?
                    }
                    SchedulerEvent::ApplyFailed(reason) => {
                        writeln!(out, "Failed to set wallpaper: {}", reason)?
                    }
                    SchedulerEvent::IntervalChanged(minutes) => {
                        writeln!(out, "Interval set to {}", interval_label(minutes))?
                    }
                    SchedulerEvent::CheckStarted { .. } | SchedulerEvent::WallpaperUnchanged(_) => {}
                }
            }
            Ok(())
        }

        pub fn show_menu(&self, out: &mut impl Write) -> io::Result<()> {
            writeln!(out, "\n=== Bing Daily Wallpaper ===")?;
            for line in self.status_lines().iter().take(3) {
                writeln!(out, "{}", line)?;
            }
            writeln!(out)?;
            writeln!(out, "1. Check now")?;
            writeln!(out, "2. Set interval")?;
            writeln!(out, "3. Detect proxy")?;
            writeln!(out, "4. Gallery")?;
            writeln!(out, "5. Open image folder")?;
            writeln!(out, "6. Exit")?;
            write!(out, "\nSelect an option (1-6): ")?;
            out.flush()
        }

        pub fn run(&mut self) -> Result<()> {
            let stdin = io::stdin();
            let stdout = io::stdout();
            self.run_with(&mut stdin.lock(), &mut stdout.lock())
        }

        /// The interactive menu loop. Ends on "6" or end of input.
        pub fn run_with(&mut self, input: &mut impl BufRead, out: &mut impl Write) -> Result<()> {
            loop {
                self.print_events(out)?;
                self.show_menu(out)?;

                let Some(choice) = read_choice(input)? else {
                    break;
                };
                match choice.as_str() {
                    "1" => match self.check_now() {
                        Ok(CheckOutcome::Applied(image)) => {
                            writeln!(out, "Set wallpaper: {}", image.local_path.display())?
                        }
                        Ok(CheckOutcome::Unchanged(image)) => {
                            writeln!(out, "Already up to date: {}", image.local_path.display())?
                        }
                        Err(e) => writeln!(out, "Update check failed: {:#}", e)?,
                    },
                    "2" => self.interval_menu(input, out)?,
                    "3" => match self.detect_proxy() {
                        Some(proxy) => writeln!(out, "Proxy detected and saved: {}", proxy)?,
                        None => writeln!(out, "No proxy found")?,
                    },
                    "4" => self.gallery_menu(input, out)?,
                    "5" => {
                        if let Err(e) = self.open_image_folder() {
                            writeln!(out, "{:#}", e)?;
                        }
                    }
                    "6" => {
                        writeln!(out, "Exiting...")?;
                        break;
                    }
                    _ => writeln!(out, "Invalid option. Please select 1-6.")?,
                }
            }
            // drain whatever arrived while the last action ran
            self.print_events(out)?;
            Ok(())
        }

        fn interval_menu(&self, input: &mut impl BufRead, out: &mut impl Write) -> Result<()> {
            let current = self.interval_minutes();
            writeln!(out, "\nCheck interval:")?;
            for (i, (label, minutes)) in INTERVAL_PRESETS.iter().enumerate() {
                let marker = if *minutes == current { "*" } else { " " };
                writeln!(out, "{} {}. {}", marker, i + 1, label)?;
            }
            match custom_interval_label(current) {
                Some(label) => writeln!(out, "* c. {}", label)?,
                None => writeln!(out, "  c. Custom...")?,
            }
            write!(out, "Select: ")?;
            out.flush()?;

            let Some(choice) = read_choice(input)? else {
                return Ok(());
            };
            let minutes = if choice.eq_ignore_ascii_case("c") {
                match prompt_custom_interval(input, out) {
                    Ok(Some(minutes)) => Some(minutes),
                    Ok(None) => return Ok(()),
                    Err(e) => {
                        writeln!(out, "{}", e)?;
                        return Ok(());
                    }
                }
            } else {
                choice
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| INTERVAL_PRESETS.get(i))
                    .map(|(_, minutes)| *minutes)
            };

            match minutes {
                Some(minutes) => {
                    if let Err(e) = self.set_interval(minutes) {
                        writeln!(out, "{}", e)?;
                    }
                }
                None => writeln!(out, "Invalid interval")?,
            }
            Ok(())
        }

        fn gallery_menu(&self, input: &mut impl BufRead, out: &mut impl Write) -> Result<()> {
            let images = self.gallery();
            if images.is_empty() {
                writeln!(out, "No cached images in {}", self.paths.image_dir.display())?;
                return Ok(());
            }
            writeln!(out, "\nRecent images:")?;
            for (i, path) in images.iter().enumerate() {
                let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("?");
                writeln!(out, "{}. {}", i + 1, name)?;
            }
            write!(out, "Apply which (Enter to go back): ")?;
            out.flush()?;

            let Some(choice) = read_choice(input)? else {
                return Ok(());
            };
            if choice.is_empty() {
                return Ok(());
            }
            let selected = choice
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| images.get(i));
            match selected {
                Some(path) => {
                    if let Err(e) = self.apply_gallery_image(path) {
                        writeln!(out, "Failed to set wallpaper: {:#}", e)?;
                    }
                }
                None => writeln!(out, "Invalid selection")?,
            }
            Ok(())
        }
    }

    pub fn validate_interval(minutes: u32) -> Result<u32> {
        if minutes > MAX_INTERVAL_MINUTES {
            bail!(
                "Interval must be between 0 and {} minutes",
                MAX_INTERVAL_MINUTES
            );
        }
        Ok(minutes)
    }

    /// Label for the "Custom" interval entry when `minutes` is not one of
    /// the presets.
    pub fn custom_interval_label(minutes: u32) -> Option<String> {
        if INTERVAL_PRESETS.iter().any(|(_, preset)| *preset == minutes) {
            None
        } else {
            Some(format!("Custom ({} min)", minutes))
        }
    }

    /// Ask for a number of minutes. `None` on empty input or end of input.
    pub fn prompt_custom_interval(
        input: &mut impl BufRead,
        out: &mut impl Write,
    ) -> Result<Option<u32>> {
        write!(out, "Minutes (0-{}): ", MAX_INTERVAL_MINUTES)?;
        out.flush()?;
        let Some(value) = read_choice(input)? else {
            return Ok(None);
        };
        if value.is_empty() {
            return Ok(None);
        }
        let minutes = value
            .parse::<u32>()
            .map_err(|_| anyhow::anyhow!("Invalid interval: {}", value))?;
        validate_interval(minutes).map(Some)
    }

    /// `None` at end of input.
    fn read_choice(input: &mut impl BufRead) -> io::Result<Option<String>> {
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    /// Wall-clock time of the last check, for status rows.
    pub fn describe_last_check(last_check: Option<Instant>, now: Instant) -> String {
        let Some(last) = last_check else {
            return "Never".to_string();
        };
        let ago = now.saturating_duration_since(last);
        match chrono::Duration::from_std(ago) {
            Ok(ago) => (Local::now() - ago).format("%Y-%m-%d %H:%M").to_string(),
            Err(_) => "Never".to_string(),
        }
    }
}
