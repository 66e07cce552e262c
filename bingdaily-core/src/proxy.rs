//! Proxy resolution: explicit config first, then registry PAC URL, PAC
//! script, and finally the `*_PROXY` environment variables.
//!
//! PAC scripts are not executed. The first `PROXY host:port` token in the
//! script text is taken as the answer, which covers the common corporate
//! "one proxy, DIRECT fallback" setup but not per-destination rules.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;

use crate::config::ConfigStore;
use crate::http::HttpTransport;

const PAC_TIMEOUT: Duration = Duration::from_secs(5);
const ENV_VARS: [&str; 4] = ["HTTP_PROXY", "HTTPS_PROXY", "http_proxy", "https_proxy"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySetting {
    pub host: String,
    pub port: String,
}

impl ProxySetting {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }

    pub fn to_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ProxySetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

fn pac_proxy_regex() -> &'static Regex {
    static PAC_PROXY: OnceLock<Regex> = OnceLock::new();
    PAC_PROXY.get_or_init(|| Regex::new(r"PROXY\s+([a-zA-Z0-9.-]+:\d+)").expect("valid PAC regex"))
}

/// First `PROXY host:port` token in a PAC script. `DIRECT` never matches.
pub fn extract_pac_proxy(pac: &str) -> Option<ProxySetting> {
    let captures = pac_proxy_regex().captures(pac)?;
    parse_proxy_string(captures.get(1)?.as_str())
}

/// Parse `host:port`, `http://user@host:port/path` and friends. A missing
/// port defaults to 80.
pub fn parse_proxy_string(value: &str) -> Option<ProxySetting> {
    let value = value.trim();
    let without_scheme = value.split_once("://").map_or(value, |(_, rest)| rest);
    let authority = without_scheme.split('/').next().unwrap_or_default();
    let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    if authority.is_empty() {
        return None;
    }

    match authority.rsplit_once(':') {
        Some((host, port))
            if !host.is_empty() && !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) =>
        {
            Some(ProxySetting::new(host, port))
        }
        Some((host, "")) if !host.is_empty() => Some(ProxySetting::new(host, "80")),
        Some(_) => None,
        None => Some(ProxySetting::new(authority, "80")),
    }
}

/// Where the system keeps its PAC URL.
pub trait PacUrlSource: Send + Sync {
    fn pac_url(&self) -> Option<String>;
}

/// `AutoConfigURL` under the Internet Settings key, HKCU before HKLM.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegistryPacSource;

impl PacUrlSource for RegistryPacSource {
    #[cfg(target_os = "windows")]
    fn pac_url(&self) -> Option<String> {
        use winreg::enums::{HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE};
        use winreg::RegKey;

        const SUBKEY: &str = "Software\\Microsoft\\Windows\\CurrentVersion\\Internet Settings";

        for (name, hive) in [("HKCU", HKEY_CURRENT_USER), ("HKLM", HKEY_LOCAL_MACHINE)] {
            let key = match RegKey::predef(hive).open_subkey(SUBKEY) {
                Ok(key) => key,
                Err(e) => {
                    log::debug!("{}\\{} not readable: {}", name, SUBKEY, e);
                    continue;
                }
            };
            match key.get_value::<String, _>("AutoConfigURL") {
                Ok(url) if !url.trim().is_empty() => {
                    log::info!("Found PAC URL in {}: {}", name, url);
                    return Some(url.trim().to_string());
                }
                Ok(_) => {}
                Err(e) => log::debug!("No AutoConfigURL in {}: {}", name, e),
            }
        }
        None
    }

    #[cfg(not(target_os = "windows"))]
    fn pac_url(&self) -> Option<String> {
        None
    }
}

pub trait ProxyDiscovery: Send + Sync {
    /// Look for a proxy. Never fails; "nothing found" is `None`.
    fn discover(&self) -> Option<ProxySetting>;
}

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Registry → PAC → environment discovery chain.
pub struct SystemProxyDiscovery {
    pac_source: Box<dyn PacUrlSource>,
    transport: Arc<dyn HttpTransport>,
    env: EnvLookup,
}

impl SystemProxyDiscovery {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            pac_source: Box::new(RegistryPacSource),
            transport,
            env: Box::new(|name| std::env::var(name).ok()),
        }
    }

    pub fn with_pac_source(mut self, source: impl PacUrlSource + 'static) -> Self {
        self.pac_source = Box::new(source);
        self
    }

    pub fn with_env(mut self, env: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        self.env = Box::new(env);
        self
    }

    fn proxy_from_pac(&self, pac_url: &str) -> Option<ProxySetting> {
        let response = match self.transport.get(pac_url, PAC_TIMEOUT, None) {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Could not fetch PAC script {}: {}", pac_url, e);
                return None;
            }
        };
        if response.status != 200 {
            log::warn!("PAC script {} returned HTTP {}", pac_url, response.status);
            return None;
        }
        match response.text() {
            Ok(script) => extract_pac_proxy(&script),
            Err(e) => {
                log::warn!("Could not read PAC script {}: {}", pac_url, e);
                None
            }
        }
    }

    fn proxy_from_env(&self) -> Option<ProxySetting> {
        ENV_VARS
            .iter()
            .filter_map(|name| (self.env)(name))
            .find(|value| !value.trim().is_empty())
            .and_then(|value| parse_proxy_string(&value))
    }
}

impl ProxyDiscovery for SystemProxyDiscovery {
    fn discover(&self) -> Option<ProxySetting> {
        if let Some(pac_url) = self.pac_source.pac_url() {
            if let Some(proxy) = self.proxy_from_pac(&pac_url) {
                log::info!("Proxy from PAC: {}", proxy);
                return Some(proxy);
            }
        }

        let proxy = self.proxy_from_env();
        if let Some(ref proxy) = proxy {
            log::info!("Proxy from environment: {}", proxy);
        }
        proxy
    }
}

/// Decides which proxy every outbound request uses.
pub struct ProxyResolver {
    config: Arc<ConfigStore>,
    discovery: Box<dyn ProxyDiscovery>,
    discovery_done: AtomicBool,
}

impl ProxyResolver {
    pub fn new(config: Arc<ConfigStore>, discovery: impl ProxyDiscovery + 'static) -> Self {
        Self {
            config,
            discovery: Box::new(discovery),
            discovery_done: AtomicBool::new(false),
        }
    }

    /// Configured proxy if present, else the result of discovery (which runs
    /// at most once per session and is persisted when it finds something).
    pub fn resolve(&self) -> Option<ProxySetting> {
        if let Some(proxy) = self.config.proxy() {
            return Some(proxy);
        }
        if self.discovery_done.swap(true, Ordering::SeqCst) {
            return None;
        }

        let proxy = self.discovery.discover()?;
        if let Err(e) = self.config.set_proxy(Some(&proxy)) {
            log::error!("Error saving detected proxy: {}", e);
        }
        Some(proxy)
    }

    /// Run discovery regardless of configuration. Nothing is persisted.
    pub fn detect(&self) -> Option<ProxySetting> {
        self.discovery.discover()
    }

    /// Run discovery and store whatever it finds.
    pub fn detect_and_save(&self) -> Option<ProxySetting> {
        let proxy = self.detect()?;
        if let Err(e) = self.config.set_proxy(Some(&proxy)) {
            log::error!("Error saving detected proxy: {}", e);
        }
        Some(proxy)
    }
}
