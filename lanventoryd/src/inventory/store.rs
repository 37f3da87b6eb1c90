use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use shared::types::{HostRecord, MdnsFact, OsInfo, PortEntry};
use crate::catalog::vendor::advertised_model;
use crate::catalog::Catalog;

/// Discovery-sourced fields for one host. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryFields {
    pub hostname: Option<String>,
    /// Already normalized to `XX:XX:XX:XX:XX:XX`
    pub mac: Option<String>,
    pub vendor_hint: Option<String>,
}

#[derive(Default)]
struct Inventory {
    /// Insertion order
    records: Vec<HostRecord>,
    index: HashMap<String, usize>,
}

impl Inventory {
    fn entry(&mut self, ip: &str) -> &mut HostRecord {
        let idx = match self.index.get(ip) {
            Some(&idx) => idx,
            None => {
                self.records.push(HostRecord::new(ip));
                let idx = self.records.len() - 1;
                self.index.insert(ip.to_string(), idx);
                idx
            }
        };
        &mut self.records[idx]
    }

    fn get_mut(&mut self, ip: &str) -> Option<&mut HostRecord> {
        let idx = *self.index.get(ip)?;
        self.records.get_mut(idx)
    }
}

/// Canonical table of discovered hosts, keyed by IP.
///
/// Every merge runs under one exclusive lock, and `snapshot` copies under the
/// same lock, so readers never see a half-applied merge. Operations never
/// fail: unknown IPs are created on demand where a merge needs a record.
#[derive(Clone)]
pub struct HostStore {
    inner: Arc<Mutex<Inventory>>,
    catalog: Arc<Catalog>,
}

impl HostStore {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inventory::default())),
            catalog,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inventory> {
        // Poisoning only means another merge panicked; the table stays usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create or update a host from a discovery report. A resolved hostname,
    /// vendor or model is never replaced by an empty value.
    pub fn upsert_discovery(&self, ip: &str, fields: DiscoveryFields) -> HostRecord {
        let mut inventory = self.lock();
        let record = inventory.entry(ip);

        if let Some(hostname) = fields.hostname.filter(|h| !h.is_empty()) {
            record.hostname = hostname;
        }

        if let Some(mac) = fields.mac.filter(|m| !m.is_empty()) {
            let vendors = &self.catalog.vendors;
            let vendor =
                vendors.resolve_vendor(&mac, fields.vendor_hint.as_deref(), &record.mdns_props);
            if !vendor.is_empty() {
                record.vendor = vendor;
            }
            let model = vendors.resolve_model(&mac, &record.vendor, &record.mdns_props);
            if !model.is_empty() {
                record.model = model;
            }
            record.mac = mac;
        }

        record.clone()
    }

    /// Replace the open-port set of a host with `ports`, sorted and unique.
    pub fn merge_ports(&self, ip: &str, ports: &[u16]) -> Vec<PortEntry> {
        let entries = self.catalog.services.entries(ports);
        let mut inventory = self.lock();
        inventory.entry(ip).ports = entries.clone();
        entries
    }

    pub fn merge_os(&self, ip: &str, info: &OsInfo) {
        let mut inventory = self.lock();
        inventory.entry(ip).os = info.os.clone();
    }

    /// Full resync: every known host either takes its entry from `results`
    /// or has its mDNS fields cleared. Returns how many hosts matched.
    pub fn merge_mdns_full(&self, results: &HashMap<String, MdnsFact>) -> usize {
        let mut inventory = self.lock();
        let mut matched = 0;

        for record in inventory.records.iter_mut() {
            match results.get(&record.ip) {
                Some(fact) => {
                    apply_mdns(record, fact);
                    if let Some(model) = advertised_model(&record.mdns_props, &record.vendor) {
                        record.model = model;
                    }
                    matched += 1;
                }
                None => {
                    record.mdns_name.clear();
                    record.mdns_services.clear();
                    record.mdns_props.clear();
                }
            }
        }

        matched
    }

    /// Apply one host's mDNS fact ahead of the full resync. Hosts not yet in
    /// the store are ignored, since the resync only covers known hosts.
    pub fn merge_mdns_partial(&self, ip: &str, fact: &MdnsFact) -> bool {
        let mut inventory = self.lock();
        match inventory.get_mut(ip) {
            Some(record) => {
                apply_mdns(record, fact);
                true
            }
            None => false,
        }
    }

    /// Copy of all records in insertion order.
    pub fn snapshot(&self) -> Vec<HostRecord> {
        self.lock().records.clone()
    }

    pub fn get(&self, ip: &str) -> Option<HostRecord> {
        let inventory = self.lock();
        let idx = *inventory.index.get(ip)?;
        inventory.records.get(idx).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// Drop every record; a new scan session starts from nothing.
    pub fn clear(&self) {
        let mut inventory = self.lock();
        inventory.records.clear();
        inventory.index.clear();
    }
}

fn apply_mdns(record: &mut HostRecord, fact: &MdnsFact) {
    record.mdns_name = fact.hostname.clone();
    record.mdns_services = fact.services.clone();
    record.mdns_props = fact
        .props
        .iter()
        .filter(|(k, _)| !k.is_empty())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
}
