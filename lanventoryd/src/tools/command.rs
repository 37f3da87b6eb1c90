use std::io;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use anyhow::{bail, Result};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use crate::config::ToolsConfig;

/// Elevation wrappers, in order of preference.
const WRAPPERS: [&str; 2] = ["doas", "sudo"];

/// Time a terminated tool gets between SIGTERM and SIGKILL.
const TERM_GRACE: Duration = Duration::from_secs(2);

/// Probes used when a discovery pass does not name its own.
pub const DEFAULT_PROBES: [&str; 4] = ["-PE", "-PS80,443", "-PU53", "-PR"];

/// Resolved external tools, plus the wrapper to run them through.
#[derive(Debug, Clone)]
pub struct Tools {
    pub nmap: PathBuf,
    pub rustscan: PathBuf,
    pub wrapper: Option<PathBuf>,
}

impl Tools {
    /// Tools as configured. Fails when elevation is needed and neither
    /// wrapper is installed.
    pub fn from_config(config: &ToolsConfig) -> Result<Self> {
        let wrapper = if config.elevate && !is_root() {
            match find_wrapper() {
                Some(wrapper) => Some(wrapper),
                None => bail!(
                    "Root privileges are required for ARP discovery; install doas or sudo, run as root, or set tools.elevate = false"
                ),
            }
        } else {
            None
        };

        if let Some(wrapper) = &wrapper {
            tracing::info!("Running scan tools through {}", wrapper.display());
        }

        Ok(Self {
            nmap: config.nmap.clone(),
            rustscan: config.rustscan.clone(),
            wrapper,
        })
    }

    /// Tools invoked directly, without a wrapper.
    pub fn direct(nmap: impl Into<PathBuf>, rustscan: impl Into<PathBuf>) -> Self {
        Self {
            nmap: nmap.into(),
            rustscan: rustscan.into(),
            wrapper: None,
        }
    }

    /// `<wrapper>? <tool> <args...>` with piped stdout/stderr, leading its
    /// own process group so [`terminate`] reaches whatever it forks. The
    /// child is killed if its handle is dropped.
    pub fn command(&self, tool: &Path, args: &[String]) -> Command {
        let mut cmd = match &self.wrapper {
            Some(wrapper) => {
                let mut cmd = Command::new(wrapper);
                cmd.arg(tool);
                cmd
            }
            None => Command::new(tool),
        };
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        cmd
    }
}

pub fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Stop `child` and the rest of its process group: SIGTERM, then SIGKILL
/// once [`TERM_GRACE`] has passed, then reap it.
pub async fn terminate(child: &mut Child) {
    let Some(pid) = child.id() else {
        // Already reaped
        return;
    };
    let group = Pid::from_raw(pid as i32);

    if let Err(e) = killpg(group, Signal::SIGTERM) {
        tracing::debug!("Failed to signal process group {}: {}", pid, e);
    }
    if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_err() {
        tracing::warn!("Process group {} ignored SIGTERM, killing it", pid);
    }
    // Forked members can outlive the leader
    let _ = killpg(group, Signal::SIGKILL);

    if let Err(e) = child.wait().await {
        tracing::warn!("Failed to reap process {}: {}", pid, e);
    }
}

/// Run `cmd` to completion, collecting its output. `Ok(None)` means `limit`
/// passed first; the process group has been terminated by then.
pub async fn output_within(mut cmd: Command, limit: Duration) -> io::Result<Option<Output>> {
    let mut child = cmd.spawn()?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let run = async {
        let (status, stdout, stderr) =
            tokio::try_join!(child.wait(), read_all(stdout), read_all(stderr))?;
        Ok::<_, io::Error>(Output { status, stdout, stderr })
    };
    let finished = tokio::time::timeout(limit, run).await;

    match finished {
        Ok(output) => output.map(Some),
        Err(_) => {
            terminate(&mut child).await;
            Ok(None)
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(pipe: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// First elevation wrapper on `PATH`.
pub fn find_wrapper() -> Option<PathBuf> {
    WRAPPERS.iter().find_map(|name| which::which(name).ok())
}

/// `-sn <probes> <subnet>`; default probes when `probes` is empty.
pub fn discovery_args(probes: &[String], subnet: &str) -> Vec<String> {
    let mut args = vec!["-sn".to_string()];
    if probes.is_empty() {
        args.extend(DEFAULT_PROBES.iter().map(|p| p.to_string()));
    } else {
        args.extend(probes.iter().cloned());
    }
    args.push(subnet.to_string());
    args
}

/// `--accessible -a <ip> --ulimit <n>` then `--range <a>-<b>` when the ports
/// form one ascending run, else `--ports <csv>`. A full 1-65535 list as csv
/// exceeds the kernel's per-argument size limit.
pub fn port_scan_args(ip: &str, ulimit: u32, ports: &[u16]) -> Vec<String> {
    let mut args = vec![
        "--accessible".to_string(),
        "-a".to_string(),
        ip.to_string(),
        "--ulimit".to_string(),
        ulimit.to_string(),
    ];
    match contiguous_range(ports) {
        Some((first, last)) => {
            args.push("--range".to_string());
            args.push(format!("{}-{}", first, last));
        }
        None => {
            let csv = ports
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(",");
            args.push("--ports".to_string());
            args.push(csv);
        }
    }
    args
}

/// `(first, last)` when `ports` is `first, first+1, ..., last` with at least
/// two entries.
fn contiguous_range(ports: &[u16]) -> Option<(u16, u16)> {
    let (&first, rest) = ports.split_first()?;
    if rest.is_empty() {
        return None;
    }
    let mut prev = first;
    for &port in rest {
        if prev.checked_add(1) != Some(port) {
            return None;
        }
        prev = port;
    }
    Some((first, prev))
}

/// `-O -oX - <ip>`
pub fn os_args(ip: &str) -> Vec<String> {
    vec!["-O".to_string(), "-oX".to_string(), "-".to_string(), ip.to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_args_default_probes() {
        assert_eq!(
            discovery_args(&[], "192.168.1.0/24"),
            vec!["-sn", "-PE", "-PS80,443", "-PU53", "-PR", "192.168.1.0/24"]
        );
    }

    #[test]
    fn test_discovery_args_explicit_probes() {
        let probes = vec!["-PR".to_string()];
        assert_eq!(discovery_args(&probes, "10.0.0.0/24"), vec!["-sn", "-PR", "10.0.0.0/24"]);
    }

    #[test]
    fn test_port_scan_args() {
        assert_eq!(
            port_scan_args("10.0.0.5", 5000, &[22, 80, 443]),
            vec!["--accessible", "-a", "10.0.0.5", "--ulimit", "5000", "--ports", "22,80,443"]
        );
    }

    #[test]
    fn test_port_scan_args_contiguous_range() {
        let full: Vec<u16> = (1..=u16::MAX).collect();
        assert_eq!(
            port_scan_args("10.0.0.5", 5000, &full),
            vec!["--accessible", "-a", "10.0.0.5", "--ulimit", "5000", "--range", "1-65535"]
        );
        assert_eq!(port_scan_args("10.0.0.5", 5000, &[8080, 8081])[5..], ["--range", "8080-8081"]);
        assert_eq!(port_scan_args("10.0.0.5", 5000, &[22])[5..], ["--ports", "22"]);
        assert_eq!(port_scan_args("10.0.0.5", 5000, &[81, 80])[5..], ["--ports", "81,80"]);
    }

    #[test]
    fn test_os_args() {
        assert_eq!(os_args("10.0.0.5"), vec!["-O", "-oX", "-", "10.0.0.5"]);
    }

    #[test]
    fn test_wrapper_is_prepended() {
        let tools = Tools {
            wrapper: Some(PathBuf::from("/usr/bin/doas")),
            ..Tools::direct("nmap", "rustscan")
        };
        let cmd = tools.command(Path::new("nmap"), &os_args("10.0.0.5"));
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "/usr/bin/doas");
        let args: Vec<_> = std_cmd.get_args().collect();
        assert_eq!(args, vec!["nmap", "-O", "-oX", "-", "10.0.0.5"]);
    }

    #[test]
    fn test_elevation_follows_effective_uid() {
        let config = ToolsConfig {
            elevate: true,
            ..Default::default()
        };
        let tools = Tools::from_config(&config);
        if is_root() {
            assert!(tools.unwrap().wrapper.is_none());
        } else if find_wrapper().is_none() {
            assert!(tools.is_err());
        } else {
            assert!(tools.unwrap().wrapper.is_some());
        }
    }

    #[test]
    fn test_elevation_disabled_needs_no_wrapper() {
        let config = ToolsConfig {
            elevate: false,
            ..Default::default()
        };
        let tools = Tools::from_config(&config).unwrap();
        assert!(tools.wrapper.is_none());
    }
}
