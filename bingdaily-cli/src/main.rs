use anyhow::{anyhow, Context, Result};
use bingdaily_cli::install::{install, InstallOptions};
use bingdaily_cli::{BingDailyApp, GALLERY_SIZE};
use bingdaily_core::config::{interval_label, AppPaths};
use bingdaily_core::logging::{self, LOG_FILE_NAME};
use bingdaily_core::source::list_cached_images;
use bingdaily_core::{AttoTransport, CheckOutcome, ProxySetting, SystemProxyDiscovery};
use clap::{Parser, Subcommand};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "bingdaily")]
#[command(about = "Bing Daily Wallpaper - sets the Bing image of the day as your desktop")]
#[command(version)]
struct Cli {
    /// Echo log output to the terminal
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler in the foreground without the menu
    Run,
    /// Check for today's image and apply it
    Check,
    /// Set the check interval in minutes (0 disables polling)
    Interval { minutes: u32 },
    /// Look for a system proxy and save it
    DetectProxy,
    /// Print the current configuration
    Status,
    /// List recently downloaded images
    Gallery {
        #[arg(long, default_value_t = GALLERY_SIZE)]
        limit: usize,
    },
    /// Copy this executable into the per-user install directory
    Install {
        #[arg(long, requires = "proxy_port")]
        proxy_host: Option<String>,
        #[arg(long, requires = "proxy_host")]
        proxy_port: Option<String>,
        /// Detect the proxy from the registry, PAC script or environment
        #[arg(long, conflicts_with = "proxy_host")]
        detect_proxy: bool,
        /// Start the installed copy afterwards
        #[arg(long)]
        launch: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = AppPaths::discover()?;
    paths.ensure_dirs()?;
    logging::init(Some(&paths.log_dir.join(LOG_FILE_NAME)), cli.debug)?;

    match cli.command {
        None => {
            let mut app = BingDailyApp::with_paths(paths)?;
            // detached: an in-flight request must not delay exit
            let _scheduler = app.start_background()?;
            println!("Bing Daily Wallpaper started");
            app.run()?;
            app.shutdown();
        }
        Some(Command::Run) => {
            let app = BingDailyApp::with_paths(paths)?;
            app.start_background()?
                .join()
                .map_err(|_| anyhow!("Scheduler thread panicked"))?;
        }
        Some(Command::Check) => {
            let app = BingDailyApp::with_paths(paths)?;
            match app.check_now()? {
                CheckOutcome::Applied(image) => {
                    println!("Set wallpaper: {}", image.local_path.display())
                }
                CheckOutcome::Unchanged(image) => {
                    println!("Already up to date: {}", image.local_path.display())
                }
            }
        }
        Some(Command::Interval { minutes }) => {
            let app = BingDailyApp::with_paths(paths)?;
            app.set_interval(minutes)?;
            println!("Interval set to {}", interval_label(minutes));
        }
        Some(Command::DetectProxy) => {
            let app = BingDailyApp::with_paths(paths)?;
            match app.detect_proxy() {
                Some(proxy) => println!("Proxy detected and saved: {}", proxy),
                None => println!("No proxy found"),
            }
        }
        Some(Command::Status) => {
            let app = BingDailyApp::with_paths(paths)?;
            for line in app.status_lines() {
                println!("{}", line);
            }
            println!("Config: {}", app.paths().config_file.display());
        }
        Some(Command::Gallery { limit }) => {
            for path in list_cached_images(&paths.image_dir, limit) {
                println!("{}", path.display());
            }
        }
        Some(Command::Install {
            proxy_host,
            proxy_port,
            detect_proxy,
            launch,
        }) => {
            let source = std::env::current_exe().context("Cannot locate the running executable")?;
            let options = InstallOptions {
                proxy: proxy_host.zip(proxy_port).map(|(h, p)| ProxySetting::new(h, p)),
                detect_proxy,
                launch,
            };
            let discovery = SystemProxyDiscovery::new(Arc::new(AttoTransport::new()));
            let report = install(&paths, &source, &options, &discovery)?;
            println!("Installed to {}", report.installed_exe.display());
            if let Some(proxy) = report.proxy {
                println!("Proxy: {}", proxy);
            }
        }
    }

    Ok(())
}
