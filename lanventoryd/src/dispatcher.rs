use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use anyhow::Result;
use crate::events::{ScanEvent, TaskEvent};
use crate::inventory::hash;
use crate::inventory::store::{DiscoveryFields, HostStore};

/// Applies task events to the store, one at a time, and tells consumers.
pub struct Dispatcher {
    store: HostStore,
    bus: broadcast::Sender<ScanEvent>,
    hash_tx: watch::Sender<String>,
}

impl Dispatcher {
    pub fn new(store: HostStore, bus: broadcast::Sender<ScanEvent>, hash_tx: watch::Sender<String>) -> Self {
        Self { store, bus, hash_tx }
    }

    /// Apply one event. Consumer events are published after the store
    /// reflects the change.
    pub fn apply(&self, event: TaskEvent) {
        let (published, mutated) = match event {
            TaskEvent::SessionStarted { mode, subnet } => {
                tracing::info!("Session started: {:?} scan of {}", mode, subnet);
                self.store.clear();
                (Some(self.hosts_event()), true)
            }
            TaskEvent::HostReported { ip, hostname } => {
                self.store.upsert_discovery(&ip, DiscoveryFields {
                    hostname: Some(hostname),
                    ..Default::default()
                });
                (Some(self.hosts_event()), true)
            }
            TaskEvent::MacReported { ip, mac, vendor_hint } => {
                self.store.upsert_discovery(&ip, DiscoveryFields {
                    mac: Some(mac),
                    vendor_hint,
                    ..Default::default()
                });
                (Some(self.hosts_event()), true)
            }
            TaskEvent::DiscoveryFinished { pass, hosts } => {
                tracing::debug!("{} reported {} hosts", pass, hosts);
                (Some(ScanEvent::DiscoveryFinished), false)
            }
            TaskEvent::PortsScanned { ip, ports } => {
                let ports = self.store.merge_ports(&ip, &ports);
                (Some(ScanEvent::PortsUpdated { ip, ports }), true)
            }
            TaskEvent::OsDetected { ip, info } => {
                self.store.merge_os(&ip, &info);
                (Some(ScanEvent::OsUpdated { ip, os: info }), true)
            }
            TaskEvent::MdnsPartial { ip, fact } => {
                let known = self.store.merge_mdns_partial(&ip, &fact);
                if !known {
                    tracing::debug!("mDNS fact for unknown host {} ignored", ip);
                }
                (Some(ScanEvent::MdnsPartial { ip, fact }), known)
            }
            TaskEvent::MdnsFull(results) => {
                let matched = self.store.merge_mdns_full(&results);
                tracing::info!("mDNS resync matched {} of {} hosts", matched, self.store.len());
                (Some(ScanEvent::MdnsFull { results: Arc::new(results) }), true)
            }
            TaskEvent::Failed(err) => (Some(ScanEvent::Error(err)), false),
        };

        if mutated {
            self.recompute_hash();
        }
        if let Some(event) = published {
            // No subscribers is fine
            let _ = self.bus.send(event);
        }
    }

    fn hosts_event(&self) -> ScanEvent {
        ScanEvent::HostDiscovered {
            hosts: Arc::new(self.store.snapshot()),
        }
    }

    fn recompute_hash(&self) {
        let new_hash = hash::compute_hash(&self.store.snapshot());
        self.hash_tx.send_if_modified(|current| {
            if *current == new_hash {
                return false;
            }
            *current = new_hash;
            true
        });
    }
}

/// Dispatcher event loop: drains task events until every sender is gone or
/// shutdown is requested.
pub async fn run(
    dispatcher: Dispatcher,
    mut rx: mpsc::Receiver<TaskEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => dispatcher.apply(event),
                None => {
                    tracing::info!("All task senders closed, dispatcher exiting");
                    break;
                }
            },
            _ = cancel.cancelled() => {
                tracing::info!("Dispatcher shutting down");
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use shared::types::{MdnsFact, OsInfo, ScanMode, TaskScope};
    use crate::catalog::Catalog;
    use crate::events::TaskError;

    fn setup() -> (Dispatcher, HostStore, broadcast::Receiver<ScanEvent>, watch::Receiver<String>) {
        let store = HostStore::new(Arc::new(Catalog::default()));
        let (bus, bus_rx) = broadcast::channel(64);
        let (hash_tx, hash_rx) = watch::channel(hash::compute_hash(&[]));
        (Dispatcher::new(store.clone(), bus, hash_tx), store, bus_rx, hash_rx)
    }

    fn host(ip: &str) -> TaskEvent {
        TaskEvent::HostReported { ip: ip.to_string(), hostname: String::new() }
    }

    #[test]
    fn test_events_published_after_store_update() {
        let (dispatcher, store, mut bus_rx, _) = setup();

        dispatcher.apply(host("10.0.0.2"));
        dispatcher.apply(host("10.0.0.1"));
        dispatcher.apply(TaskEvent::PortsScanned { ip: "10.0.0.1".into(), ports: vec![443, 22, 443] });

        match bus_rx.try_recv().unwrap() {
            ScanEvent::HostDiscovered { hosts } => assert_eq!(hosts.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
        match bus_rx.try_recv().unwrap() {
            ScanEvent::HostDiscovered { hosts } => {
                let ips: Vec<&str> = hosts.iter().map(|h| h.ip.as_str()).collect();
                assert_eq!(ips, vec!["10.0.0.2", "10.0.0.1"]);
            }
            other => panic!("unexpected {:?}", other),
        }
        match bus_rx.try_recv().unwrap() {
            ScanEvent::PortsUpdated { ip, ports } => {
                assert_eq!(ip, "10.0.0.1");
                let ports: Vec<u16> = ports.iter().map(|p| p.port).collect();
                assert_eq!(ports, vec![22, 443]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(store.get("10.0.0.1").unwrap().ports.len(), 2);
    }

    #[test]
    fn test_session_start_clears_and_hash_tracks_content() {
        let (dispatcher, store, _bus_rx, hash_rx) = setup();
        let empty = hash_rx.borrow().clone();

        dispatcher.apply(host("10.0.0.1"));
        assert_ne!(*hash_rx.borrow(), empty);

        dispatcher.apply(TaskEvent::SessionStarted { mode: ScanMode::Quick, subnet: "10.0.0.0/24".into() });
        assert_eq!(store.len(), 0);
        assert_eq!(*hash_rx.borrow(), empty);
    }

    #[test]
    fn test_mdns_partial_then_full() {
        let (dispatcher, store, _bus_rx, _) = setup();
        dispatcher.apply(host("10.0.0.1"));
        dispatcher.apply(host("10.0.0.2"));

        let fact = MdnsFact {
            hostname: "printer.local".into(),
            services: vec!["_ipp._tcp.local.".into()],
            props: [("ty".to_string(), "Printer 100".to_string())].into_iter().collect(),
        };
        dispatcher.apply(TaskEvent::MdnsPartial { ip: "10.0.0.2".into(), fact: fact.clone() });
        dispatcher.apply(TaskEvent::MdnsPartial { ip: "10.0.0.9".into(), fact: fact.clone() });
        assert_eq!(store.get("10.0.0.2").unwrap().mdns_name, "printer.local");
        assert!(store.get("10.0.0.9").is_none());

        let results: HashMap<String, MdnsFact> = [("10.0.0.1".to_string(), fact)].into_iter().collect();
        dispatcher.apply(TaskEvent::MdnsFull(results));
        assert_eq!(store.get("10.0.0.1").unwrap().model, "Printer 100");
        assert!(store.get("10.0.0.2").unwrap().mdns_name.is_empty());
    }

    #[test]
    fn test_failures_republished_without_touching_store() {
        let (dispatcher, store, mut bus_rx, hash_rx) = setup();
        let before = hash_rx.borrow().clone();
        let err = TaskError::new(TaskScope::PortScan, Some("10.0.0.1"), &anyhow::anyhow!("boom"));

        dispatcher.apply(TaskEvent::Failed(err.clone()));

        assert_eq!(store.len(), 0);
        assert_eq!(*hash_rx.borrow(), before);
        match bus_rx.try_recv().unwrap() {
            ScanEvent::Error(e) => assert_eq!(e, err),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_applies_in_send_order() {
        let (dispatcher, store, _bus_rx, _) = setup();
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(run(dispatcher, rx, CancellationToken::new()));

        tx.send(host("10.0.0.1")).await.unwrap();
        tx.send(TaskEvent::OsDetected {
            ip: "10.0.0.1".into(),
            info: OsInfo { os: "Linux 5.X".into(), accuracy: "98".into() },
        })
        .await
        .unwrap();
        drop(tx);

        handle.await.unwrap().unwrap();
        assert_eq!(store.get("10.0.0.1").unwrap().os, "Linux 5.X");
    }
}
