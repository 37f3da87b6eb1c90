pub mod command;
pub mod discovery;
pub mod flight;
pub mod os_detect;
pub mod parse;
pub mod port_scan;

#[cfg(test)]
pub mod testutil {
    use std::path::{Path, PathBuf};
    use super::command::Tools;

    /// Write a shell script standing in for an external tool.
    pub fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        path
    }

    /// Tools whose binaries are the given scripts, run through `/bin/sh` so
    /// the scripts need no exec bit.
    pub fn sh_tools(nmap: PathBuf, rustscan: PathBuf) -> Tools {
        Tools {
            wrapper: Some(PathBuf::from("/bin/sh")),
            ..Tools::direct(nmap, rustscan)
        }
    }
}
