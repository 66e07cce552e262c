#![cfg_attr(target_os = "windows", windows_subsystem = "windows")]

use anyhow::Result;
use bingdaily_cli::BingDailyApp;
use bingdaily_core::config::AppPaths;
use bingdaily_core::logging::{self, LOG_FILE_NAME};
use clap::Parser;

#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
mod icon;
#[cfg(target_os = "windows")]
mod tray;

#[cfg(target_os = "windows")]
use windows_sys::Win32::{
    System::Console::{AllocConsole, GetConsoleWindow},
    UI::WindowsAndMessaging::{ShowWindow, SW_HIDE, SW_SHOW},
};

#[derive(Parser)]
#[command(name = "bingdaily-tray")]
#[command(about = "Bing Daily Wallpaper - tray icon")]
#[command(version)]
struct Cli {
    /// Run in CLI mode (text-based interface)
    #[arg(long)]
    cli: bool,

    /// Show debug console and echo logs to it (Windows only)
    #[arg(long)]
    debug: bool,
}

#[cfg(target_os = "windows")]
fn hide_console() {
    unsafe {
        let console_window = GetConsoleWindow();
        if !console_window.is_null() {
            ShowWindow(console_window, SW_HIDE);
        }
    }
}

#[cfg(target_os = "windows")]
fn show_console() {
    unsafe {
        let console_window = GetConsoleWindow();
        if !console_window.is_null() {
            ShowWindow(console_window, SW_SHOW);
        } else {
            AllocConsole();
        }
    }
}

fn run_cli_mode(mut app: BingDailyApp) -> Result<()> {
    let _scheduler = app.start_background()?;
    println!("Bing Daily Wallpaper CLI mode started");
    app.run()?;
    app.shutdown();
    Ok(())
}

#[cfg(target_os = "windows")]
fn run_tray_mode(app: BingDailyApp, debug: bool) -> Result<()> {
    tray::run(app, debug)
}

#[cfg(not(target_os = "windows"))]
fn run_tray_mode(app: BingDailyApp, _debug: bool) -> Result<()> {
    log::warn!("Tray icon is only supported on Windows; falling back to CLI mode");
    run_cli_mode(app)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    #[cfg(target_os = "windows")]
    {
        if cli.debug || cli.cli {
            show_console();
        } else {
            hide_console();
        }
    }

    let paths = AppPaths::discover()?;
    paths.ensure_dirs()?;
    logging::init(Some(&paths.log_dir.join(LOG_FILE_NAME)), cli.debug)?;
    log::info!("Starting, data dir {}", paths.data_dir.display());

    let app = BingDailyApp::with_paths(paths)?;
    if cli.cli {
        run_cli_mode(app)
    } else {
        run_tray_mode(app, cli.debug)
    }
}
