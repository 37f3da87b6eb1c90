use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use crate::events::{emit, TaskEvent, TaskSender};
use super::command::{discovery_args, terminate, Tools};
use super::parse::{parse_discovery_line, parse_mac_line};

/// One discovery pass: a label for logs and the probe flags to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbePass {
    pub label: String,
    /// Empty means the combined default probes
    pub probes: Vec<String>,
}

impl ProbePass {
    /// ICMP, SYN, UDP and ARP probes in a single pass.
    pub fn combined() -> Self {
        Self {
            label: "discovery".to_string(),
            probes: Vec::new(),
        }
    }

    /// ARP-only, ICMP-only, then TCP/UDP-only passes.
    pub fn deep() -> Vec<Self> {
        let pass = |label: &str, probes: &[&str]| Self {
            label: label.to_string(),
            probes: probes.iter().map(|p| p.to_string()).collect(),
        };
        vec![
            pass("ARP pass", &["-PR"]),
            pass("ICMP pass", &["-PE"]),
            pass("TCP/UDP pass", &["-PS80,443", "-PU53"]),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOutcome {
    /// Distinct hosts reported in this pass
    pub hosts: usize,
    pub exit_code: Option<i32>,
    pub cancelled: bool,
}

/// Runs the discovery tool over a subnet and streams what it reports.
pub struct DiscoveryRunner {
    tools: Arc<Tools>,
    reverse_dns: bool,
}

impl DiscoveryRunner {
    pub fn new(tools: Arc<Tools>, reverse_dns: bool) -> Self {
        Self { tools, reverse_dns }
    }

    /// Run one pass. Host and MAC lines become task events in output order,
    /// followed by `DiscoveryFinished` once the tool exits, whatever its exit
    /// code. Only a failure to launch the tool is an error.
    ///
    /// MAC lines carry no address of their own; each is attributed to the
    /// host reported most recently. This relies on the tool printing the MAC
    /// line right after its host's report.
    pub async fn run(
        &self,
        subnet: &str,
        pass: &ProbePass,
        tx: &TaskSender,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryOutcome> {
        let args = discovery_args(&pass.probes, subnet);
        tracing::info!("Starting {} of {} ({})", pass.label, subnet, args.join(" "));

        let mut child = self
            .tools
            .command(&self.tools.nmap, &args)
            .spawn()
            .with_context(|| format!("Failed to launch {}", self.tools.nmap.display()))?;

        let stdout = child.stdout.take().context("Discovery stdout not captured")?;
        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut seen = HashSet::new();
        let mut last_ip: Option<String> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("{} cancelled, stopping discovery tool", pass.label);
                    terminate(&mut child).await;
                    stderr_task.abort();
                    return Ok(DiscoveryOutcome {
                        hosts: seen.len(),
                        exit_code: None,
                        cancelled: true,
                    });
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => self.handle_line(&line, &mut seen, &mut last_ip, tx).await,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("Failed to read discovery output: {}", e);
                        break;
                    }
                }
            }
        }

        let status = child.wait().await.context("Failed to wait for discovery tool")?;
        let stderr = stderr_task.await.unwrap_or_default();
        if !status.success() {
            tracing::debug!(
                "Discovery tool exited with {}: {}",
                status,
                stderr.trim()
            );
        }

        tracing::info!("{} finished: {} hosts", pass.label, seen.len());
        emit(tx, TaskEvent::DiscoveryFinished {
            pass: pass.label.clone(),
            hosts: seen.len(),
        })
        .await;

        Ok(DiscoveryOutcome {
            hosts: seen.len(),
            exit_code: status.code(),
            cancelled: false,
        })
    }

    async fn handle_line(
        &self,
        line: &str,
        seen: &mut HashSet<String>,
        last_ip: &mut Option<String>,
        tx: &TaskSender,
    ) {
        if let Some(report) = parse_discovery_line(line) {
            if seen.insert(report.ip.clone()) {
                let reported = if report.host != report.ip { report.host.clone() } else { String::new() };
                let hostname = match self.reverse_lookup(&report.ip).await {
                    Some(name) => name,
                    None => reported,
                };
                tracing::debug!("Discovered {} ({})", report.ip, hostname);
                emit(tx, TaskEvent::HostReported {
                    ip: report.ip.clone(),
                    hostname,
                })
                .await;
            }
            *last_ip = Some(report.ip);
            return;
        }

        if let Some(mac) = parse_mac_line(line) {
            match last_ip {
                Some(ip) => {
                    emit(tx, TaskEvent::MacReported {
                        ip: ip.clone(),
                        mac: mac.mac,
                        vendor_hint: mac.vendor_hint,
                    })
                    .await;
                }
                None => tracing::debug!("MAC line before any host report: {}", line.trim()),
            }
        }
    }

    async fn reverse_lookup(&self, ip: &str) -> Option<String> {
        if !self.reverse_dns {
            return None;
        }
        let addr: IpAddr = ip.parse().ok()?;
        let name = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&addr).ok())
            .await
            .ok()
            .flatten()?;
        (name != ip).then_some(name)
    }
}
