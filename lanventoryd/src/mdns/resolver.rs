use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, Result};
use async_trait::async_trait;
use shared::types::{MdnsFact, TaskScope};
use crate::events::{emit, TaskError, TaskEvent, TaskSender};

/// A fully resolved service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedService {
    pub service_type: String,
    pub instance: String,
    /// Without the trailing dot
    pub hostname: String,
    pub addresses: Vec<IpAddr>,
    pub port: u16,
    /// Raw TXT properties; a value-less key has `None`
    pub txt: Vec<(String, Option<Vec<u8>>)>,
}

/// Browse and resolve primitives of an mDNS client. One browser serves one
/// resolution cycle.
#[async_trait]
pub trait ServiceBrowser: Send + Sync {
    /// Service types advertised within `window`.
    async fn service_types(&self, window: Duration) -> Result<BTreeSet<String>>;

    /// `(type, instance)` pairs seen within `window` while browsing `types`.
    async fn instances(&self, types: &BTreeSet<String>, window: Duration)
        -> Result<Vec<(String, String)>>;

    /// Resolve one instance, giving up after `timeout`.
    async fn resolve(&self, service_type: &str, instance: &str, timeout: Duration)
        -> Result<ResolvedService>;
}

pub trait BrowserFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn ServiceBrowser>>;
}

/// Three-phase mDNS resolution: types, then instances, then per-instance
/// resolution, folded into one fact per IP address.
#[derive(Clone)]
pub struct MdnsResolver {
    factory: Arc<dyn BrowserFactory>,
}

impl MdnsResolver {
    pub fn new(factory: Arc<dyn BrowserFactory>) -> Self {
        Self { factory }
    }

    /// Run one cycle. Each phase listens for `window`, and each instance
    /// lookup is bounded by `window` too. Every resolved instance is streamed
    /// as `MdnsPartial` carrying the fact accumulated so far for its IP.
    /// Lookups that time out are dropped and reported once, together.
    pub async fn resolve_all(
        &self,
        window: Duration,
        tx: &TaskSender,
    ) -> Result<HashMap<String, MdnsFact>> {
        let browser = self.factory.open().context("Failed to open mDNS browser")?;

        let types = browser.service_types(window).await?;
        tracing::debug!("Discovered service types: {:?}", types);

        let instances = browser.instances(&types, window).await?;
        tracing::debug!("Discovered {} service instances", instances.len());

        let mut hosts: HashMap<String, MdnsFact> = HashMap::new();
        let mut unresolved = 0usize;

        for (service_type, instance) in &instances {
            let service = match browser.resolve(service_type, instance, window).await {
                Ok(service) => service,
                Err(e) => {
                    tracing::debug!("Failed to resolve {}: {:#}", instance, e);
                    unresolved += 1;
                    continue;
                }
            };

            let Some(ip) = primary_address(&service.addresses) else {
                tracing::debug!("Skipping {} - no address", instance);
                continue;
            };
            let ip = ip.to_string();

            let fact = accumulate(&mut hosts, &ip, &service);
            emit(tx, TaskEvent::MdnsPartial { ip, fact }).await;
        }

        if unresolved > 0 {
            let err = anyhow::anyhow!(
                "{} of {} service instances did not resolve within {}ms",
                unresolved,
                instances.len(),
                window.as_millis()
            );
            emit(tx, TaskEvent::Failed(TaskError::new(TaskScope::Mdns, None, &err))).await;
        }

        tracing::info!(
            "mDNS resolution complete: {} types, {} instances, {} hosts",
            types.len(),
            instances.len(),
            hosts.len()
        );
        Ok(hosts)
    }
}

/// Fold `service` into the entry for `ip` and return the updated entry.
fn accumulate(hosts: &mut HashMap<String, MdnsFact>, ip: &str, service: &ResolvedService) -> MdnsFact {
    let entry = hosts.entry(ip.to_string()).or_insert_with(|| MdnsFact {
        hostname: service.hostname.clone(),
        ..Default::default()
    });
    if !entry.services.contains(&service.service_type) {
        entry.services.push(service.service_type.clone());
    }
    for (key, value) in &service.txt {
        if key.is_empty() {
            continue;
        }
        entry.props.insert(key.clone(), decode_txt_value(value.as_deref()));
    }
    entry.clone()
}

/// UTF-8 text when valid, hex otherwise.
pub fn decode_txt_value(value: Option<&[u8]>) -> String {
    match value {
        None => String::new(),
        Some(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(_) => hex::encode(bytes),
        },
    }
}

/// Lowest IPv4 address, else lowest IPv6 address.
pub fn primary_address(addresses: &[IpAddr]) -> Option<IpAddr> {
    addresses
        .iter()
        .filter(|a| a.is_ipv4())
        .min()
        .or_else(|| addresses.iter().min())
        .copied()
}
