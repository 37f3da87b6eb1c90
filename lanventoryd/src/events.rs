use std::collections::HashMap;
use std::sync::Arc;
use serde::Serialize;
use tokio::sync::mpsc;
use shared::types::{HostRecord, MdnsFact, OsInfo, PortEntry, ScanMode, TaskScope};

/// Facts produced by scan tasks, applied to the store by the dispatcher in
/// the order they were sent.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// A new session begins; the store is cleared.
    SessionStarted { mode: ScanMode, subnet: String },
    HostReported { ip: String, hostname: String },
    /// MAC line attributed to the most recently reported host
    MacReported { ip: String, mac: String, vendor_hint: Option<String> },
    DiscoveryFinished { pass: String, hosts: usize },
    PortsScanned { ip: String, ports: Vec<u16> },
    OsDetected { ip: String, info: OsInfo },
    MdnsPartial { ip: String, fact: MdnsFact },
    MdnsFull(HashMap<String, MdnsFact>),
    Failed(TaskError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskError {
    pub scope: TaskScope,
    pub ip: Option<String>,
    pub message: String,
}

impl TaskError {
    pub fn new(scope: TaskScope, ip: Option<&str>, err: &anyhow::Error) -> Self {
        Self {
            scope,
            ip: ip.map(str::to_string),
            message: format!("{:#}", err),
        }
    }
}

/// Events delivered to inventory consumers after the store was updated.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEvent {
    HostDiscovered { hosts: Arc<Vec<HostRecord>> },
    DiscoveryFinished,
    PortsUpdated { ip: String, ports: Vec<PortEntry> },
    OsUpdated { ip: String, os: OsInfo },
    MdnsPartial { ip: String, fact: MdnsFact },
    MdnsFull { results: Arc<HashMap<String, MdnsFact>> },
    Error(TaskError),
}

pub type TaskSender = mpsc::Sender<TaskEvent>;

/// Send a task event, logging if the dispatcher is gone.
pub async fn emit(tx: &TaskSender, event: TaskEvent) {
    if let Err(e) = tx.send(event).await {
        tracing::error!("Failed to deliver task event: {}", e);
    }
}
