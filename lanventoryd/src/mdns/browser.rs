use std::collections::{BTreeSet, HashMap};
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::Future;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::time::{timeout_at, Instant};
use shared::protocol::META_QUERY_TYPE;
use super::resolver::{BrowserFactory, ResolvedService, ServiceBrowser};

type RecvResult = (String, flume::Receiver<ServiceEvent>, std::result::Result<ServiceEvent, flume::RecvError>);
type RecvFuture = Pin<Box<dyn Future<Output = RecvResult> + Send>>;

/// Each future owns a clone of the receiver; flume receivers are multi-consumer.
fn make_recv_future(service_type: String, rx: flume::Receiver<ServiceEvent>) -> RecvFuture {
    Box::pin(async move {
        let result = rx.recv_async().await;
        (service_type, rx, result)
    })
}

/// Opens browsers on a shared mdns-sd daemon.
pub struct SdBrowserFactory {
    daemon: ServiceDaemon,
}

impl SdBrowserFactory {
    pub fn new(daemon: ServiceDaemon) -> Self {
        Self { daemon }
    }
}

impl BrowserFactory for SdBrowserFactory {
    fn open(&self) -> Result<Box<dyn ServiceBrowser>> {
        Ok(Box::new(SdBrowser::new(self.daemon.clone())))
    }
}

/// One resolution cycle against the daemon. The daemon resolves instances
/// while they are browsed, so resolutions seen during the instance phase are
/// kept and answered from memory later. Browses stop when this is dropped.
pub struct SdBrowser {
    daemon: ServiceDaemon,
    receivers: Mutex<HashMap<String, flume::Receiver<ServiceEvent>>>,
    resolved: Mutex<HashMap<String, ResolvedService>>,
}

impl SdBrowser {
    pub fn new(daemon: ServiceDaemon) -> Self {
        Self {
            daemon,
            receivers: Mutex::new(HashMap::new()),
            resolved: Mutex::new(HashMap::new()),
        }
    }

    fn remember(&self, info: &ServiceInfo) -> ResolvedService {
        let service = convert_service_info(info);
        self.resolved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(service.instance.clone(), service.clone());
        service
    }

    fn cached(&self, instance: &str) -> Option<ResolvedService> {
        self.resolved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(instance)
            .cloned()
    }

    fn receiver(&self, service_type: &str) -> Option<flume::Receiver<ServiceEvent>> {
        self.receivers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(service_type)
            .cloned()
    }
}

#[async_trait]
impl ServiceBrowser for SdBrowser {
    async fn service_types(&self, window: Duration) -> Result<BTreeSet<String>> {
        let meta = self
            .daemon
            .browse(META_QUERY_TYPE)
            .context("Failed to start meta-query browse")?;

        let deadline = Instant::now() + window;
        let mut types = BTreeSet::new();
        while let Ok(event) = timeout_at(deadline, meta.recv_async()).await {
            match event {
                Ok(ServiceEvent::ServiceFound(_, name)) => {
                    types.insert(name);
                }
                Ok(ServiceEvent::ServiceResolved(info)) => {
                    types.insert(info.get_type().to_string());
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Meta-query receiver disconnected: {}", e);
                    break;
                }
            }
        }

        if let Err(e) = self.daemon.stop_browse(META_QUERY_TYPE) {
            tracing::debug!("Failed to stop meta-query browse: {}", e);
        }

        types.retain(|t| t.ends_with(".local."));
        Ok(types)
    }

    async fn instances(
        &self,
        types: &BTreeSet<String>,
        window: Duration,
    ) -> Result<Vec<(String, String)>> {
        let mut futures: FuturesUnordered<RecvFuture> = FuturesUnordered::new();
        {
            let mut receivers = self.receivers.lock().unwrap_or_else(|e| e.into_inner());
            for service_type in types {
                match self.daemon.browse(service_type) {
                    Ok(rx) => {
                        futures.push(make_recv_future(service_type.clone(), rx.clone()));
                        receivers.insert(service_type.clone(), rx);
                    }
                    Err(e) => tracing::warn!("Failed to browse {}: {}", service_type, e),
                }
            }
        }

        let deadline = Instant::now() + window;
        let mut found: Vec<(String, String)> = Vec::new();
        let mut push = |ty: &str, instance: &str| {
            if !found.iter().any(|(_, i)| i == instance) {
                found.push((ty.to_string(), instance.to_string()));
            }
        };

        while let Ok(Some((ty, rx, result))) = timeout_at(deadline, futures.next()).await {
            match result {
                Ok(ServiceEvent::ServiceFound(_, fullname)) => push(&ty, &fullname),
                Ok(ServiceEvent::ServiceResolved(info)) => {
                    let service = self.remember(&info);
                    push(&ty, &service.instance);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!("Receiver for {} disconnected: {}", ty, e);
                    continue;
                }
            }
            futures.push(make_recv_future(ty, rx));
        }

        Ok(found)
    }

    async fn resolve(
        &self,
        service_type: &str,
        instance: &str,
        timeout: Duration,
    ) -> Result<ResolvedService> {
        if let Some(service) = self.cached(instance) {
            return Ok(service);
        }
        let rx = self
            .receiver(service_type)
            .with_context(|| format!("Not browsing {}", service_type))?;

        let deadline = Instant::now() + timeout;
        loop {
            match timeout_at(deadline, rx.recv_async()).await {
                Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                    let service = self.remember(&info);
                    if service.instance == instance {
                        return Ok(service);
                    }
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => anyhow::bail!("Receiver for {} disconnected: {}", service_type, e),
                Err(_) => anyhow::bail!("Timed out resolving {}", instance),
            }
        }
    }
}

impl Drop for SdBrowser {
    fn drop(&mut self) {
        let receivers = self.receivers.get_mut().unwrap_or_else(|e| e.into_inner());
        for service_type in receivers.keys() {
            if let Err(e) = self.daemon.stop_browse(service_type) {
                tracing::debug!("Failed to stop browsing {}: {}", service_type, e);
            }
        }
    }
}

fn convert_service_info(info: &ServiceInfo) -> ResolvedService {
    ResolvedService {
        service_type: info.get_type().to_string(),
        instance: info.get_fullname().to_string(),
        hostname: info.get_hostname().trim_end_matches('.').to_string(),
        addresses: info.get_addresses().iter().copied().collect(),
        port: info.get_port(),
        txt: info
            .get_properties()
            .iter()
            .map(|prop| (prop.key().to_string(), prop.val().map(<[u8]>::to_vec)))
            .collect(),
    }
}
