use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use ipnetwork::Ipv4Network;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use shared::types::{PortSelection, ScanMode, ScanPhase, ScanState, TaskScope};
use crate::catalog::Catalog;
use crate::config::Config;
use crate::events::{emit, TaskError, TaskEvent, TaskSender};
use crate::mdns::resolver::{BrowserFactory, MdnsResolver};
use crate::tools::command::Tools;
use crate::tools::discovery::{DiscoveryRunner, ProbePass};
use crate::tools::flight::SingleFlight;
use crate::tools::os_detect::OsDetectRunner;
use crate::tools::port_scan::PortScanRunner;

/// Why a scan session was not started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    InvalidSubnet(String),
    /// A session is running and restart was not requested
    Busy,
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartError::InvalidSubnet(subnet) => {
                write!(f, "Invalid subnet {:?}: expected IPv4 CIDR like 192.168.1.0/24", subnet)
            }
            StartError::Busy => f.write_str("A scan session is already running"),
        }
    }
}

impl std::error::Error for StartError {}

/// Outcome of a per-host task request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// A task of the same kind is already running for this IP
    InFlight,
}

/// Accept only IPv4 CIDR notation (`a.b.c.d/n`).
pub fn validate_subnet(subnet: &str) -> Result<String, StartError> {
    let subnet = subnet.trim();
    let invalid = || StartError::InvalidSubnet(subnet.to_string());
    if !subnet.contains('/') {
        return Err(invalid());
    }
    subnet.parse::<Ipv4Network>().map_err(|_| invalid())?;
    Ok(subnet.to_string())
}

#[derive(Debug, Clone, Copy)]
struct Timing {
    pass_settle: Duration,
    mdns_settle: Duration,
    quick_window: Duration,
    deep_window: Duration,
}

/// Everything a running session needs, cloned into its task.
#[derive(Clone)]
struct SessionContext {
    tx: TaskSender,
    discovery: Arc<DiscoveryRunner>,
    mdns: MdnsResolver,
    timing: Timing,
    state_tx: Arc<watch::Sender<ScanState>>,
}

struct Session {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Sequences scan sessions and admits per-host tasks.
///
/// A session runs `Discovering(1..N) -> ResolvingMdns -> Idle`. At most one
/// session runs at a time; at most one port scan and one OS fingerprint run
/// per IP.
pub struct Orchestrator {
    ctx: SessionContext,
    ports: Arc<PortScanRunner>,
    os: Arc<OsDetectRunner>,
    session: Mutex<Option<Session>>,
    port_flights: SingleFlight,
    os_flights: SingleFlight,
}

impl Orchestrator {
    pub fn new(
        tx: TaskSender,
        tools: Arc<Tools>,
        catalog: Arc<Catalog>,
        browsers: Arc<dyn BrowserFactory>,
        config: &Config,
    ) -> Self {
        let timing = Timing {
            pass_settle: Duration::from_millis(config.scan.pass_settle_ms),
            mdns_settle: Duration::from_millis(config.scan.mdns_settle_ms),
            quick_window: config.scan.mdns_window(ScanMode::Quick),
            deep_window: config.scan.mdns_window(ScanMode::Deep),
        };
        let (state_tx, _) = watch::channel(ScanState::idle());

        Self {
            ctx: SessionContext {
                tx,
                discovery: Arc::new(DiscoveryRunner::new(tools.clone(), config.scan.reverse_dns)),
                mdns: MdnsResolver::new(browsers),
                timing,
                state_tx: Arc::new(state_tx),
            },
            ports: Arc::new(PortScanRunner::new(tools.clone(), catalog, &config.ports)),
            os: Arc::new(OsDetectRunner::new(tools, Duration::from_secs(config.os.timeout_secs))),
            session: Mutex::new(None),
            port_flights: SingleFlight::default(),
            os_flights: SingleFlight::default(),
        }
    }

    pub fn state(&self) -> ScanState {
        self.ctx.state_tx.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ScanState> {
        self.ctx.state_tx.subscribe()
    }

    /// Start a session over `subnet`. With `restart`, a running session is
    /// cancelled and its discovery tool killed and awaited first; without
    /// it, a running session makes this fail with `Busy`.
    pub async fn start_scan(&self, subnet: &str, mode: ScanMode, restart: bool) -> Result<(), StartError> {
        let subnet = validate_subnet(subnet)?;

        let mut current = self.session.lock().await;
        if let Some(session) = current.take() {
            if !session.handle.is_finished() {
                if !restart {
                    *current = Some(session);
                    return Err(StartError::Busy);
                }
                tracing::info!("Restarting scan session");
                session.cancel.cancel();
            }
            if let Err(e) = session.handle.await {
                tracing::error!("Previous session task failed: {}", e);
            }
        }

        let passes = match mode {
            ScanMode::Quick => vec![ProbePass::combined()],
            ScanMode::Deep => ProbePass::deep(),
        };
        let started_at = Utc::now();
        self.ctx.state_tx.send_replace(ScanState {
            phase: ScanPhase::Discovering { pass: 1, of: passes.len(), label: passes[0].label.clone() },
            mode: Some(mode),
            subnet: Some(subnet.clone()),
            started_at: Some(started_at),
        });

        let cancel = CancellationToken::new();
        let ctx = self.ctx.clone();
        let session_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            run_session(&ctx, &subnet, mode, &passes, &session_cancel).await;
            ctx.state_tx.send_replace(ScanState::idle());
        });

        *current = Some(Session { cancel, handle });
        Ok(())
    }

    /// Queue a port scan of `ip`, unless one is already running for it.
    pub fn request_port_scan(&self, ip: &str, selection: PortSelection) -> Admission {
        let Some(guard) = self.port_flights.try_acquire(ip) else {
            tracing::debug!("Port scan of {} already in flight", ip);
            return Admission::InFlight;
        };

        let runner = self.ports.clone();
        let tx = self.ctx.tx.clone();
        tokio::spawn(async move {
            let ip = guard.key().to_string();
            let event = match runner.scan(&ip, &selection).await {
                Ok(ports) => TaskEvent::PortsScanned { ip, ports },
                Err(e) => TaskEvent::Failed(TaskError::new(TaskScope::PortScan, Some(&ip), &e)),
            };
            // Free the slot before the result is visible
            drop(guard);
            emit(&tx, event).await;
        });

        Admission::Accepted
    }

    /// Queue an OS fingerprint of `ip`, unless one is already running for it.
    pub fn request_os(&self, ip: &str) -> Admission {
        let Some(guard) = self.os_flights.try_acquire(ip) else {
            tracing::debug!("OS fingerprint of {} already in flight", ip);
            return Admission::InFlight;
        };

        let runner = self.os.clone();
        let tx = self.ctx.tx.clone();
        tokio::spawn(async move {
            let ip = guard.key().to_string();
            let event = match runner.detect(&ip).await {
                Ok(info) => TaskEvent::OsDetected { ip, info },
                Err(e) => TaskEvent::Failed(TaskError::new(TaskScope::OsFingerprint, Some(&ip), &e)),
            };
            drop(guard);
            emit(&tx, event).await;
        });

        Admission::Accepted
    }

    pub fn port_scans_in_flight(&self) -> Vec<String> {
        self.port_flights.active()
    }

    pub fn os_in_flight(&self) -> Vec<String> {
        self.os_flights.active()
    }

    /// Cancel the running session, if any, and wait for it to wind down.
    pub async fn shutdown(&self) {
        if let Some(session) = self.session.lock().await.take() {
            session.cancel.cancel();
            if let Err(e) = session.handle.await {
                tracing::error!("Session task failed: {}", e);
            }
        }
    }
}

async fn run_session(
    ctx: &SessionContext,
    subnet: &str,
    mode: ScanMode,
    passes: &[ProbePass],
    cancel: &CancellationToken,
) {
    tracing::info!("Starting {:?} scan of {} ({} passes)", mode, subnet, passes.len());
    emit(&ctx.tx, TaskEvent::SessionStarted { mode, subnet: subnet.to_string() }).await;

    for (i, pass) in passes.iter().enumerate() {
        if i > 0 && !settle(ctx.timing.pass_settle, cancel).await {
            return;
        }
        ctx.state_tx.send_modify(|state| {
            state.phase = ScanPhase::Discovering { pass: i + 1, of: passes.len(), label: pass.label.clone() };
        });

        match ctx.discovery.run(subnet, pass, &ctx.tx, cancel).await {
            Ok(outcome) if outcome.cancelled => return,
            Ok(_) => {}
            Err(e) => {
                tracing::error!("Aborting scan of {}: {:#}", subnet, e);
                let e = e.context(format!("{} failed to start; scan aborted", pass.label));
                emit(&ctx.tx, TaskEvent::Failed(TaskError::new(TaskScope::Discovery, None, &e))).await;
                return;
            }
        }
    }

    let window = match mode {
        ScanMode::Quick => ctx.timing.quick_window,
        ScanMode::Deep => {
            if !settle(ctx.timing.mdns_settle, cancel).await {
                return;
            }
            ctx.timing.deep_window
        }
    };

    ctx.state_tx.send_modify(|state| state.phase = ScanPhase::ResolvingMdns);
    let resolved = tokio::select! {
        _ = cancel.cancelled() => {
            tracing::info!("mDNS resolution cancelled");
            return;
        }
        resolved = ctx.mdns.resolve_all(window, &ctx.tx) => resolved,
    };

    match resolved {
        Ok(results) => emit(&ctx.tx, TaskEvent::MdnsFull(results)).await,
        Err(e) => {
            tracing::warn!("mDNS resolution failed: {:#}", e);
            emit(&ctx.tx, TaskEvent::Failed(TaskError::new(TaskScope::Mdns, None, &e))).await;
        }
    }

    tracing::info!("Scan of {} complete", subnet);
}

/// Sleep unless cancelled first. Returns false on cancellation.
async fn settle(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
