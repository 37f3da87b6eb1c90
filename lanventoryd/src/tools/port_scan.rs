use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{bail, Context, Result};
use shared::types::PortSelection;
use crate::catalog::Catalog;
use crate::config::PortsConfig;
use super::command::{output_within, port_scan_args, Tools};
use super::parse::parse_open_port_line;

/// Scans the TCP ports of a single host.
pub struct PortScanRunner {
    tools: Arc<Tools>,
    catalog: Arc<Catalog>,
    ulimit: u32,
    timeout: Duration,
}

impl PortScanRunner {
    pub fn new(tools: Arc<Tools>, catalog: Arc<Catalog>, config: &PortsConfig) -> Self {
        Self {
            tools,
            catalog,
            ulimit: config.ulimit,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Open ports of `ip`, ascending and unique. Launch failure, timeout and
    /// non-zero exit are errors.
    pub async fn scan(&self, ip: &str, selection: &PortSelection) -> Result<Vec<u16>> {
        let ports = self.catalog.services.ports_for(selection);
        if ports.is_empty() {
            bail!("No ports selected");
        }

        let args = port_scan_args(ip, self.ulimit, &ports);
        tracing::debug!("Port scan of {} over {} ports", ip, ports.len());

        let output = output_within(self.tools.command(&self.tools.rustscan, &args), self.timeout)
            .await
            .with_context(|| format!("Failed to launch {}", self.tools.rustscan.display()))?
            .ok_or_else(|| anyhow::anyhow!("Timed out after {}s", self.timeout.as_secs()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("Port scanner exited with {}: {}", output.status, stderr.trim());
        }

        let open: BTreeSet<u16> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(parse_open_port_line)
            .collect();

        tracing::info!("Port scan of {} found {} open ports", ip, open.len());
        Ok(open.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testutil::{script, sh_tools};

    fn runner(tools: Tools, timeout_secs: u64) -> PortScanRunner {
        let config = PortsConfig {
            timeout_secs,
            ..Default::default()
        };
        PortScanRunner::new(Arc::new(tools), Arc::new(Catalog::default()), &config)
    }

    #[tokio::test]
    async fn test_open_ports_sorted_unique() {
        let dir = tempfile::tempdir().unwrap();
        let args_log = dir.path().join("args");
        let rustscan = script(
            dir.path(),
            "rustscan",
            &format!(
                "echo \"$@\" > {}\n\
                 echo 'Discovered open port 443/tcp on 10.0.0.5'\n\
                 echo 'Discovered open port 80/tcp on 10.0.0.5'\n\
                 echo 'Discovered open port 80/tcp on 10.0.0.5'\n\
                 echo '10.0.0.5 -> [80,443]'",
                args_log.display()
            ),
        );
        let runner = runner(sh_tools("nmap".into(), rustscan), 10);

        let ports = runner
            .scan("10.0.0.5", &PortSelection::Custom(vec![443, 80, 22]))
            .await
            .unwrap();

        assert_eq!(ports, vec![80, 443]);
        assert_eq!(
            std::fs::read_to_string(&args_log).unwrap().trim(),
            "--accessible -a 10.0.0.5 --ulimit 5000 --ports 443,80,22"
        );
    }

    #[tokio::test]
    async fn test_full_scan_with_builtin_catalog_launches() {
        let dir = tempfile::tempdir().unwrap();
        let args_log = dir.path().join("args");
        let rustscan = script(
            dir.path(),
            "rustscan",
            &format!(
                "echo \"$@\" > {}\n\
                 echo 'Discovered open port 8443/tcp on 10.0.0.5'",
                args_log.display()
            ),
        );
        let runner = runner(sh_tools("nmap".into(), rustscan), 10);

        let ports = runner.scan("10.0.0.5", &PortSelection::Full).await.unwrap();

        assert_eq!(ports, vec![8443]);
        assert_eq!(
            std::fs::read_to_string(&args_log).unwrap().trim(),
            "--accessible -a 10.0.0.5 --ulimit 5000 --range 1-65535"
        );
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let rustscan = script(dir.path(), "rustscan", "echo 'ulimit too low' >&2\nexit 1");
        let runner = runner(sh_tools("nmap".into(), rustscan), 10);

        let err = runner.scan("10.0.0.5", &PortSelection::Quick).await.unwrap_err();
        assert!(err.to_string().contains("ulimit too low"));
    }

    #[tokio::test]
    async fn test_timeout_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let rustscan = script(dir.path(), "rustscan", "exec sleep 30");
        let runner = runner(sh_tools("nmap".into(), rustscan), 1);

        let err = runner.scan("10.0.0.5", &PortSelection::Quick).await.unwrap_err();
        assert!(err.to_string().contains("Timed out"));
    }

    #[tokio::test]
    async fn test_empty_custom_selection_is_error() {
        let runner = runner(Tools::direct("nmap", "rustscan"), 10);
        assert!(runner.scan("10.0.0.5", &PortSelection::Custom(vec![])).await.is_err());
    }
}
