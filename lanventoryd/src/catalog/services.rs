use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use shared::types::{PortEntry, PortSelection};

/// Well-known TCP services used when no nmap-services file is installed.
const BUILTIN_SERVICES: &[(u16, &str)] = &[
    (21, "ftp"),
    (22, "ssh"),
    (23, "telnet"),
    (25, "smtp"),
    (53, "domain"),
    (80, "http"),
    (88, "kerberos-sec"),
    (110, "pop3"),
    (111, "rpcbind"),
    (135, "msrpc"),
    (139, "netbios-ssn"),
    (143, "imap"),
    (389, "ldap"),
    (443, "https"),
    (445, "microsoft-ds"),
    (515, "printer"),
    (548, "afp"),
    (554, "rtsp"),
    (631, "ipp"),
    (993, "imaps"),
    (995, "pop3s"),
    (1723, "pptp"),
    (1883, "mqtt"),
    (3306, "mysql"),
    (3389, "ms-wbt-server"),
    (5000, "upnp"),
    (5432, "postgresql"),
    (5900, "vnc"),
    (7000, "afs3-fileserver"),
    (8000, "http-alt"),
    (8008, "http"),
    (8080, "http-proxy"),
    (8443, "https-alt"),
    (9100, "jetdirect"),
    (62078, "iphone-sync"),
];

/// Port → service name table plus the port lists offered to port scans.
#[derive(Debug, Clone)]
pub struct ServiceCatalog {
    names: HashMap<u16, String>,
    /// Ports in file order, unique
    common: Vec<u16>,
    quick_count: usize,
    /// Full scans probe 1-65535 when no services file was found
    full_range_fallback: bool,
}

impl Default for ServiceCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ServiceCatalog {
    pub fn builtin() -> Self {
        Self {
            names: BUILTIN_SERVICES
                .iter()
                .map(|(port, name)| (*port, name.to_string()))
                .collect(),
            common: BUILTIN_SERVICES.iter().map(|(port, _)| *port).collect(),
            quick_count: BUILTIN_SERVICES.len(),
            full_range_fallback: true,
        }
    }

    /// Parse nmap-services content: `name port/proto [freq] ...`, TCP only.
    pub fn parse(contents: &str, quick_count: usize) -> Self {
        let mut names = HashMap::new();
        let mut common = Vec::new();
        let mut seen = HashSet::new();

        for line in contents.lines() {
            if line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (Some(name), Some(port_proto)) = (fields.next(), fields.next()) else {
                continue;
            };
            let Some(port) = port_proto
                .strip_suffix("/tcp")
                .and_then(|p| p.parse::<u16>().ok())
            else {
                continue;
            };
            if seen.insert(port) {
                common.push(port);
                names.insert(port, name.to_string());
            }
        }

        Self {
            names,
            common,
            quick_count,
            full_range_fallback: false,
        }
    }

    /// Use the first readable services file, or the built-in table.
    pub fn load(paths: &[PathBuf], quick_count: usize) -> Self {
        for path in paths {
            if !path.exists() {
                continue;
            }
            match std::fs::read_to_string(path) {
                Ok(contents) => {
                    let catalog = Self::parse(&contents, quick_count);
                    if !catalog.common.is_empty() {
                        tracing::debug!("Loaded {} TCP services from {}", catalog.len(), path.display());
                        return catalog;
                    }
                }
                Err(e) => tracing::warn!("Failed to read {}: {}", path.display(), e),
            }
        }
        tracing::warn!("nmap-services file not found; using built-in service table");
        Self::builtin()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Service name for `port`, empty when unknown.
    pub fn name(&self, port: u16) -> &str {
        self.names.get(&port).map(String::as_str).unwrap_or("")
    }

    pub fn ports_for(&self, selection: &PortSelection) -> Vec<u16> {
        match selection {
            PortSelection::Quick => self.common.iter().take(self.quick_count).copied().collect(),
            PortSelection::Full if self.full_range_fallback => (1..=u16::MAX).collect(),
            PortSelection::Full => self.common.clone(),
            PortSelection::Custom(ports) => ports.clone(),
        }
    }

    /// De-duplicate, sort ascending and attach service names.
    pub fn entries(&self, ports: &[u16]) -> Vec<PortEntry> {
        ports
            .iter()
            .copied()
            .collect::<BTreeSet<u16>>()
            .into_iter()
            .map(|port| PortEntry {
                port,
                name: self.name(port).to_string(),
            })
            .collect()
    }
}
