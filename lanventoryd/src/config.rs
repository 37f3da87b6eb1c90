use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::types::ScanMode;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub ports: PortsConfig,
    #[serde(default)]
    pub os: OsConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    /// Host discovery and OS fingerprint binary
    #[serde(default = "default_nmap")]
    pub nmap: PathBuf,
    /// Port scan binary
    #[serde(default = "default_rustscan")]
    pub rustscan: PathBuf,
    /// Prepend doas/sudo to tool invocations when not running as root
    #[serde(default = "default_true")]
    pub elevate: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_quick_mdns_window")]
    pub quick_mdns_window_ms: u64,
    #[serde(default = "default_deep_mdns_window")]
    pub deep_mdns_window_ms: u64,
    /// Pause between deep-scan discovery passes
    #[serde(default = "default_pass_settle")]
    pub pass_settle_ms: u64,
    /// Pause between the last deep-scan pass and mDNS resolution
    #[serde(default = "default_mdns_settle")]
    pub mdns_settle_ms: u64,
    #[serde(default = "default_true")]
    pub reverse_dns: bool,
    /// Session to launch as soon as the daemon is up
    #[serde(default)]
    pub autostart: Option<AutostartConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutostartConfig {
    pub subnet: String,
    #[serde(default = "default_mode")]
    pub mode: ScanMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortsConfig {
    #[serde(default = "default_ulimit")]
    pub ulimit: u32,
    #[serde(default = "default_port_timeout")]
    pub timeout_secs: u64,
    /// Size of the quick port list
    #[serde(default = "default_quick_count")]
    pub quick_count: usize,
    /// Candidate nmap-services locations, first existing one wins
    #[serde(default = "default_services_files")]
    pub services_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsConfig {
    #[serde(default = "default_os_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// Directory holding oui_extra.json, mac_overrides.json and apple_models.json
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Wireshark manuf locations, tried after `<data_dir>/manuf`
    #[serde(default = "default_manuf_files")]
    pub manuf_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_nmap() -> PathBuf {
    PathBuf::from("nmap")
}

fn default_rustscan() -> PathBuf {
    PathBuf::from("rustscan")
}

fn default_true() -> bool {
    true
}

fn default_quick_mdns_window() -> u64 {
    1000
}

fn default_deep_mdns_window() -> u64 {
    2000
}

fn default_pass_settle() -> u64 {
    200
}

fn default_mdns_settle() -> u64 {
    1000
}

fn default_mode() -> ScanMode {
    ScanMode::Quick
}

fn default_ulimit() -> u32 {
    5000
}

fn default_port_timeout() -> u64 {
    120
}

fn default_quick_count() -> usize {
    1000
}

fn default_services_files() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/share/nmap/nmap-services"),
        PathBuf::from("/usr/local/share/nmap/nmap-services"),
        PathBuf::from("/opt/homebrew/share/nmap/nmap-services"),
    ]
}

fn default_os_timeout() -> u64 {
    60
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/usr/share/lanventory")
}

fn default_manuf_files() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/share/wireshark/manuf"),
        PathBuf::from("/usr/local/share/wireshark/manuf"),
        PathBuf::from("/opt/homebrew/share/wireshark/manuf"),
    ]
}

fn default_listen() -> String {
    "127.0.0.1:8054".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            nmap: default_nmap(),
            rustscan: default_rustscan(),
            elevate: default_true(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            quick_mdns_window_ms: default_quick_mdns_window(),
            deep_mdns_window_ms: default_deep_mdns_window(),
            pass_settle_ms: default_pass_settle(),
            mdns_settle_ms: default_mdns_settle(),
            reverse_dns: default_true(),
            autostart: None,
        }
    }
}

impl ScanConfig {
    /// Window for each mDNS phase; deep scans listen longer.
    pub fn mdns_window(&self, mode: ScanMode) -> Duration {
        match mode {
            ScanMode::Quick => Duration::from_millis(self.quick_mdns_window_ms),
            ScanMode::Deep => Duration::from_millis(self.deep_mdns_window_ms),
        }
    }
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            ulimit: default_ulimit(),
            timeout_secs: default_port_timeout(),
            quick_count: default_quick_count(),
            services_files: default_services_files(),
        }
    }
}

impl Default for OsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_os_timeout(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            manuf_files: default_manuf_files(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}
