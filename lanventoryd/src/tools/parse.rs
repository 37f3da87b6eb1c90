//! Line and XML parsers for discovery, port-scan and OS-fingerprint output.
//!
//! All functions are pure: a line that does not match yields `None`.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use shared::types::OsInfo;
use crate::catalog::vendor::normalize_mac;

static REPORT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\S+ scan report for (?P<host>\S+)(?: \((?P<ip>[0-9A-Fa-f.:]+)\))?")
        .expect("static regex")
});

static MAC_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"MAC Address:\s*(?P<mac>[0-9A-Fa-f:\-]+)(?:\s*\((?P<vendor>[^)]+)\))?")
        .expect("static regex")
});

static OPEN_PORT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Discovered open port (?P<port>\d+)/tcp").expect("static regex")
});

/// A host report line from the discovery tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostReport {
    /// Name as printed; equals `ip` when the tool printed no name
    pub host: String,
    pub ip: String,
}

/// A MAC line, printed right after the report of the host it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacReport {
    pub mac: String,
    pub vendor_hint: Option<String>,
}

/// `"Nmap scan report for printer.local (192.168.1.9)"` or
/// `"Nmap scan report for 192.168.1.5"`.
pub fn parse_discovery_line(line: &str) -> Option<HostReport> {
    let caps = REPORT_LINE.captures(line)?;
    let host = caps.name("host")?.as_str().trim().to_string();
    let ip = caps
        .name("ip")
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| host.clone());
    Some(HostReport { host, ip })
}

/// `"MAC Address: AA:BB:CC:DD:EE:FF (Acme Corp)"`, vendor part optional.
pub fn parse_mac_line(line: &str) -> Option<MacReport> {
    let caps = MAC_LINE.captures(line)?;
    let mac = normalize_mac(caps.name("mac")?.as_str())?;
    let vendor_hint = caps
        .name("vendor")
        .map(|m| m.as_str().trim().to_string())
        .filter(|v| !v.is_empty());
    Some(MacReport { mac, vendor_hint })
}

/// `"Discovered open port 443/tcp on 10.0.0.1"`.
pub fn parse_open_port_line(line: &str) -> Option<u16> {
    OPEN_PORT_LINE.captures(line)?.name("port")?.as_str().parse().ok()
}

/// First `host/os/osmatch` of an XML report. A report without any match is
/// `"Unknown"`; malformed XML is an error.
pub fn parse_os_xml(xml: &str) -> Result<OsInfo> {
    let doc = roxmltree::Document::parse(xml).context("Malformed OS fingerprint XML")?;

    let osmatch = doc
        .descendants()
        .filter(|n| n.has_tag_name("host"))
        .flat_map(|host| host.children().filter(|n| n.has_tag_name("os")))
        .flat_map(|os| os.children().filter(|n| n.has_tag_name("osmatch")))
        .next();

    Ok(match osmatch {
        Some(node) => OsInfo {
            os: node.attribute("name").unwrap_or("Unknown").to_string(),
            accuracy: node.attribute("accuracy").unwrap_or("").to_string(),
        },
        None => OsInfo {
            os: "Unknown".to_string(),
            accuracy: String::new(),
        },
    })
}
