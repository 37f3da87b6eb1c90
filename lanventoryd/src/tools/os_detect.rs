use std::sync::Arc;
use std::time::Duration;
use anyhow::{bail, Context, Result};
use shared::types::OsInfo;
use super::command::{os_args, output_within, Tools};
use super::parse::parse_os_xml;

/// Fingerprints the operating system of a single host.
pub struct OsDetectRunner {
    tools: Arc<Tools>,
    timeout: Duration,
}

impl OsDetectRunner {
    pub fn new(tools: Arc<Tools>, timeout: Duration) -> Self {
        Self { tools, timeout }
    }

    pub async fn detect(&self, ip: &str) -> Result<OsInfo> {
        let output = output_within(self.tools.command(&self.tools.nmap, &os_args(ip)), self.timeout)
            .await
            .with_context(|| format!("Failed to launch {}", self.tools.nmap.display()))?
            .ok_or_else(|| anyhow::anyhow!("Timed out after {}s", self.timeout.as_secs()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("OS detection exited with {}: {}", output.status, stderr.trim());
        }

        let info = parse_os_xml(&String::from_utf8_lossy(&output.stdout))?;
        tracing::info!("Detected OS for {}: {} (accuracy {})", ip, info.os, info.accuracy);
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testutil::{script, sh_tools};

    #[tokio::test]
    async fn test_detect_parses_xml() {
        let dir = tempfile::tempdir().unwrap();
        let nmap = script(
            dir.path(),
            "nmap",
            "cat <<'EOF'\n<nmaprun><host><os><osmatch name=\"Apple iOS 16\" accuracy=\"95\"/></os></host></nmaprun>\nEOF",
        );
        let runner = OsDetectRunner::new(Arc::new(sh_tools(nmap, "rustscan".into())), Duration::from_secs(10));

        let info = runner.detect("10.0.0.8").await.unwrap();
        assert_eq!(info, OsInfo { os: "Apple iOS 16".to_string(), accuracy: "95".to_string() });
    }

    #[tokio::test]
    async fn test_malformed_xml_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let nmap = script(dir.path(), "nmap", "echo '<nmaprun><host>'");
        let runner = OsDetectRunner::new(Arc::new(sh_tools(nmap, "rustscan".into())), Duration::from_secs(10));

        assert!(runner.detect("10.0.0.8").await.is_err());
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let nmap = script(dir.path(), "nmap", "echo 'requires root' >&2\nexit 1");
        let runner = OsDetectRunner::new(Arc::new(sh_tools(nmap, "rustscan".into())), Duration::from_secs(10));

        let err = runner.detect("10.0.0.8").await.unwrap_err();
        assert!(err.to_string().contains("requires root"));
    }
}
