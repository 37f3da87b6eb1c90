use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One open TCP port on a host, with its well-known service name if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortEntry {
    pub port: u16,
    /// Empty when the port has no registered service name
    pub name: String,
}

/// A discovered host. This is the canonical record held by the inventory
/// store and served by the API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    /// Unique key, never changes after creation
    pub ip: String,

    /// Reverse-DNS name
    pub hostname: String,

    /// Normalized `XX:XX:XX:XX:XX:XX`, empty until a discovery line reports it
    pub mac: String,

    /// Empty means not yet resolved
    pub vendor: String,

    pub model: String,

    /// Set only by OS fingerprinting
    pub os: String,

    /// Ascending, unique by port number
    pub ports: Vec<PortEntry>,

    /// Bonjour hostname, e.g. "printer.local"
    pub mdns_name: String,

    /// Service types advertised by the host, e.g. "_ipp._tcp.local."
    pub mdns_services: Vec<String>,

    /// TXT record properties, never contains an empty key
    pub mdns_props: BTreeMap<String, String>,
}

impl HostRecord {
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            ..Default::default()
        }
    }
}

/// mDNS facts collected for one IP address during a resolution cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MdnsFact {
    pub hostname: String,
    pub services: Vec<String>,
    pub props: BTreeMap<String, String>,
}

/// Result of an OS fingerprint run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsInfo {
    pub os: String,
    /// Percentage as reported by the tool, empty when unknown
    pub accuracy: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// One combined discovery pass, then a short mDNS cycle
    Quick,
    /// ARP, ICMP and TCP/UDP passes in sequence, then a longer mDNS cycle
    Deep,
}

/// Which ports a per-host port scan should probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "ports")]
pub enum PortSelection {
    #[default]
    Quick,
    Full,
    Custom(Vec<u16>),
}

/// Phase of the current scan session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ScanPhase {
    Idle,
    Discovering { pass: usize, of: usize, label: String },
    ResolvingMdns,
}

/// Observable state of the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanState {
    pub phase: ScanPhase,
    pub mode: Option<ScanMode>,
    pub subnet: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl ScanState {
    pub fn idle() -> Self {
        Self {
            phase: ScanPhase::Idle,
            mode: None,
            subnet: None,
            started_at: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.phase == ScanPhase::Idle
    }
}

/// Which kind of task an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskScope {
    Discovery,
    PortScan,
    OsFingerprint,
    Mdns,
    Session,
}

impl std::fmt::Display for TaskScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskScope::Discovery => "discovery",
            TaskScope::PortScan => "port-scan",
            TaskScope::OsFingerprint => "os-fingerprint",
            TaskScope::Mdns => "mdns",
            TaskScope::Session => "session",
        };
        f.write_str(name)
    }
}
