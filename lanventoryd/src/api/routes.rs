use std::net::IpAddr;
use std::sync::Arc;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use shared::protocol::API_PREFIX;
use shared::types::{HostRecord, PortSelection, ScanMode, ScanState};
use crate::inventory::store::HostStore;
use crate::orchestrator::{Admission, Orchestrator, StartError};

#[derive(Clone)]
pub struct AppState {
    pub store: HostStore,
    pub hash_rx: watch::Receiver<String>,
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Serialize)]
pub struct ScanStatus {
    pub state: ScanState,
    /// IPs with a port scan in flight
    pub port_scans: Vec<String>,
    /// IPs with an OS fingerprint in flight
    pub os_fingerprints: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub subnet: String,
    #[serde(default = "default_mode")]
    pub mode: ScanMode,
    #[serde(default)]
    pub restart: bool,
}

fn default_mode() -> ScanMode {
    ScanMode::Quick
}

#[derive(Debug, Default, Deserialize)]
pub struct PortScanRequest {
    #[serde(default)]
    pub selection: PortSelection,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: message.into() })).into_response()
}

pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/hosts", get(get_hosts))
        .route("/hosts/hash", get(get_hash))
        .route("/hosts/:ip", get(get_host))
        .route("/hosts/:ip/ports", post(scan_ports))
        .route("/hosts/:ip/os", post(detect_os))
        .route("/scan", get(get_scan).post(start_scan));

    Router::new().nest(API_PREFIX, v1).with_state(state)
}

async fn get_hosts(State(state): State<AppState>) -> Json<Vec<HostRecord>> {
    Json(state.store.snapshot())
}

async fn get_hash(State(state): State<AppState>) -> String {
    state.hash_rx.borrow().clone()
}

async fn get_host(
    State(state): State<AppState>,
    Path(ip): Path<String>,
) -> Result<Json<HostRecord>, StatusCode> {
    state.store.get(&ip).map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn get_scan(State(state): State<AppState>) -> Json<ScanStatus> {
    Json(ScanStatus {
        state: state.orchestrator.state(),
        port_scans: state.orchestrator.port_scans_in_flight(),
        os_fingerprints: state.orchestrator.os_in_flight(),
    })
}

async fn start_scan(State(state): State<AppState>, Json(req): Json<ScanRequest>) -> Response {
    match state.orchestrator.start_scan(&req.subnet, req.mode, req.restart).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(state.orchestrator.state())).into_response(),
        Err(e @ StartError::InvalidSubnet(_)) => error(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e @ StartError::Busy) => error(StatusCode::CONFLICT, e.to_string()),
    }
}

async fn scan_ports(
    State(state): State<AppState>,
    Path(ip): Path<String>,
    body: Option<Json<PortScanRequest>>,
) -> Response {
    if ip.parse::<IpAddr>().is_err() {
        return error(StatusCode::BAD_REQUEST, format!("Invalid IP address {:?}", ip));
    }
    let selection = body.map(|Json(req)| req.selection).unwrap_or_default();
    admission_response(state.orchestrator.request_port_scan(&ip, selection), "port scan", &ip)
}

async fn detect_os(State(state): State<AppState>, Path(ip): Path<String>) -> Response {
    if ip.parse::<IpAddr>().is_err() {
        return error(StatusCode::BAD_REQUEST, format!("Invalid IP address {:?}", ip));
    }
    admission_response(state.orchestrator.request_os(&ip), "OS fingerprint", &ip)
}

fn admission_response(admission: Admission, task: &str, ip: &str) -> Response {
    match admission {
        Admission::Accepted => StatusCode::ACCEPTED.into_response(),
        Admission::InFlight => error(
            StatusCode::CONFLICT,
            format!("A {} of {} is already running", task, ip),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use crate::catalog::Catalog;
    use crate::config::Config;
    use crate::inventory::hash;
    use crate::inventory::store::DiscoveryFields;
    use crate::mdns::resolver::tests::FakeBrowser;
    use crate::tools::command::Tools;

    fn app_state() -> (AppState, mpsc::Receiver<crate::events::TaskEvent>) {
        let catalog = Arc::new(Catalog::default());
        let store = HostStore::new(catalog.clone());
        let (tx, rx) = mpsc::channel(16);
        let (_hash_tx, hash_rx) = watch::channel(hash::compute_hash(&[]));
        let orchestrator = Orchestrator::new(
            tx,
            Arc::new(Tools::direct("/nonexistent/nmap", "/nonexistent/rustscan")),
            catalog,
            Arc::new(FakeBrowser::default()),
            &Config::default(),
        );
        let state = AppState { store, hash_rx, orchestrator: Arc::new(orchestrator) };
        (state, rx)
    }

    #[tokio::test]
    async fn test_get_host_found_and_missing() {
        let (state, _rx) = app_state();
        state.store.upsert_discovery("10.0.0.1", DiscoveryFields::default());

        let Json(host) = get_host(State(state.clone()), Path("10.0.0.1".to_string())).await.unwrap();
        assert_eq!(host.ip, "10.0.0.1");

        let missing = get_host(State(state), Path("10.0.0.2".to_string())).await;
        assert_eq!(missing.unwrap_err(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_start_scan_rejects_invalid_subnet() {
        let (state, _rx) = app_state();
        let req = ScanRequest { subnet: "10.0.0.1".into(), mode: ScanMode::Quick, restart: false };

        let response = start_scan(State(state), Json(req)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_os_request_conflicts_while_in_flight() {
        let (state, _rx) = app_state();

        let first = detect_os(State(state.clone()), Path("10.0.0.3".to_string())).await;
        let second = detect_os(State(state.clone()), Path("10.0.0.3".to_string())).await;
        // The first request may already have failed and freed its slot
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        assert!(matches!(second.status(), StatusCode::CONFLICT | StatusCode::ACCEPTED));

        let bad = detect_os(State(state), Path("not-an-ip".to_string())).await;
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_scan_request_defaults() {
        let req: ScanRequest = serde_json::from_str(r#"{"subnet": "10.0.0.0/24"}"#).unwrap();
        assert_eq!(req.mode, ScanMode::Quick);
        assert!(!req.restart);

        let req: PortScanRequest =
            serde_json::from_str(r#"{"selection": {"kind": "custom", "ports": [22, 80]}}"#).unwrap();
        assert_eq!(req.selection, PortSelection::Custom(vec![22, 80]));
    }
}
