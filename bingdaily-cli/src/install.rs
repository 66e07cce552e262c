//! Per-user installation: copy the executable into the data directory and
//! seed its `config.json`.

use anyhow::{bail, Context, Result};
use bingdaily_core::config::{read_settings, write_settings, AppPaths, Settings, APP_NAME};
use bingdaily_core::proxy::{ProxyDiscovery, ProxySetting};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Explicit proxy; wins over detection.
    pub proxy: Option<ProxySetting>,
    pub detect_proxy: bool,
    pub launch: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub installed_exe: PathBuf,
    pub config_written: bool,
    pub proxy: Option<ProxySetting>,
}

pub fn installed_exe_path(paths: &AppPaths) -> PathBuf {
    paths
        .data_dir
        .join(format!("{}{}", APP_NAME, std::env::consts::EXE_SUFFIX))
}

pub fn install(
    paths: &AppPaths,
    source_exe: &Path,
    options: &InstallOptions,
    discovery: &dyn ProxyDiscovery,
) -> Result<InstallReport> {
    log::info!("Starting installation into {}", paths.data_dir.display());
    if !source_exe.is_file() {
        bail!("Source file missing: {}", source_exe.display());
    }
    paths.ensure_dirs()?;

    let installed_exe = installed_exe_path(paths);
    if same_file(source_exe, &installed_exe) {
        log::info!("Already running from {}", installed_exe.display());
    } else {
        log::info!("Copying to {}...", installed_exe.display());
        fs::copy(source_exe, &installed_exe).with_context(|| {
            format!(
                "Failed to copy {} to {}",
                source_exe.display(),
                installed_exe.display()
            )
        })?;
    }
    if !installed_exe.is_file() {
        bail!("Copy failed - file not found at {}", installed_exe.display());
    }

    let proxy = match &options.proxy {
        Some(proxy) => Some(proxy.clone()),
        None if options.detect_proxy => {
            let found = discovery.discover();
            match &found {
                Some(proxy) => log::info!("Detected proxy: {}", proxy),
                None => log::info!("No proxy detected"),
            }
            found
        }
        None => None,
    };

    let config_written = write_config(&paths.config_file, proxy.as_ref())?;

    if options.launch {
        log::info!("Launching {}", installed_exe.display());
        Command::new(&installed_exe)
            .current_dir(&paths.data_dir)
            .spawn()
            .with_context(|| format!("Failed to launch {}", installed_exe.display()))?;
    }

    log::info!("Installation successful");
    Ok(InstallReport {
        installed_exe,
        config_written,
        proxy,
    })
}

/// Seed the config when it is missing, or store a newly supplied proxy while
/// keeping the rest of an existing file.
fn write_config(config_file: &Path, proxy: Option<&ProxySetting>) -> Result<bool> {
    let exists = config_file.exists();
    if exists && proxy.is_none() {
        return Ok(false);
    }

    let mut settings = if exists {
        read_settings(config_file).unwrap_or_else(|e| {
            log::warn!("Replacing unreadable config: {}", e);
            Settings::default()
        })
    } else {
        Settings::default()
    };
    if let Some(proxy) = proxy {
        settings.proxy_host = proxy.host.clone();
        settings.proxy_port = proxy.port.clone();
    }
    write_settings(config_file, &settings)?;
    Ok(true)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
