//! Discovery of running local Jupyter servers.
//!
//! Every Jupyter server writes a `jpserver-{pid}.json` file (or
//! `nbserver-{pid}.json` for the classic notebook server) into the Jupyter
//! runtime directory while it is running.

use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// A running Jupyter server as described by its runtime file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JupyterServerInfo {
    /// Full server URL including the base path, e.g. `http://localhost:8888/`.
    pub url: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub pid: u32,
    #[serde(default)]
    pub token: String,
    #[serde(default, alias = "notebook_dir")]
    pub root_dir: Option<PathBuf>,
    /// Runtime file this entry was read from.
    #[serde(skip)]
    pub info_file: PathBuf,
}

/// Lists the local Jupyter servers currently running.
pub trait RunningServers: Send + Sync {
    fn list(&self) -> Vec<JupyterServerInfo>;
}

/// Reads server runtime files from a Jupyter runtime directory.
#[derive(Debug, Clone)]
pub struct RuntimeDirServers {
    runtime_dir: PathBuf,
    check_pid: bool,
}

impl Default for RuntimeDirServers {
    fn default() -> Self {
        Self::new(runtimelib::dirs::runtime_dir())
    }
}

impl RuntimeDirServers {
    pub fn new(runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime_dir: runtime_dir.into(),
            check_pid: true,
        }
    }

    /// Keep entries whose process no longer exists.
    pub fn without_pid_check(mut self) -> Self {
        self.check_pid = false;
        self
    }

    pub fn runtime_dir(&self) -> &Path {
        &self.runtime_dir
    }
}

impl RunningServers for RuntimeDirServers {
    fn list(&self) -> Vec<JupyterServerInfo> {
        let entries = match std::fs::read_dir(&self.runtime_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(
                    "[jupyter] Cannot read runtime dir {:?}: {}",
                    self.runtime_dir, e
                );
                return Vec::new();
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_server_info_file(path))
            .collect();
        files.sort();

        files
            .into_iter()
            .filter_map(|path| read_server_info(&path))
            .filter(|info| !self.check_pid || pid_is_alive(info.pid))
            .collect()
    }
}

fn is_server_info_file(path: &Path) -> bool {
    if path.extension().and_then(|s| s.to_str()) != Some("json") {
        return false;
    }
    let file_name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
    file_name.starts_with("jpserver-") || file_name.starts_with("nbserver-")
}

fn read_server_info(path: &Path) -> Option<JupyterServerInfo> {
    let contents = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<JupyterServerInfo>(&contents) {
        Ok(mut info) => {
            info.info_file = path.to_path_buf();
            Some(info)
        }
        Err(e) => {
            warn!("[jupyter] Skipping unreadable server file {:?}: {}", path, e);
            None
        }
    }
}

#[cfg(unix)]
fn pid_is_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if pid == 0 {
        return false;
    }
    // Signal 0 only checks for existence; EPERM means it exists but is not ours.
    match kill(Pid::from_raw(pid as i32), None::<Signal>) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn pid_is_alive(pid: u32) -> bool {
    pid != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_server_file(dir: &Path, name: &str, url: &str, pid: u32) {
        let body = json!({
            "base_url": "/",
            "hostname": "localhost",
            "pid": pid,
            "port": 8888,
            "root_dir": "/home/user",
            "secure": false,
            "token": "abc",
            "url": url,
            "version": "2.14.0"
        });
        std::fs::write(dir.join(name), body.to_string()).unwrap();
    }

    #[test]
    fn test_empty_dir_lists_nothing() {
        let tmp = TempDir::new().unwrap();
        assert!(RuntimeDirServers::new(tmp.path()).list().is_empty());
    }

    #[test]
    fn test_missing_dir_lists_nothing() {
        let tmp = TempDir::new().unwrap();
        let servers = RuntimeDirServers::new(tmp.path().join("does-not-exist"));
        assert!(servers.list().is_empty());
    }

    #[test]
    fn test_reads_server_files_in_name_order() {
        let tmp = TempDir::new().unwrap();
        write_server_file(tmp.path(), "jpserver-200.json", "http://localhost:8889/", 200);
        write_server_file(tmp.path(), "jpserver-100.json", "http://localhost:8888/", 100);
        write_server_file(tmp.path(), "kernel-1234.json", "http://ignored/", 1);
        std::fs::write(tmp.path().join("jpserver-300.json"), "not json").unwrap();

        let servers = RuntimeDirServers::new(tmp.path())
            .without_pid_check()
            .list();

        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].url, "http://localhost:8888/");
        assert_eq!(servers[0].pid, 100);
        assert_eq!(servers[0].root_dir, Some(PathBuf::from("/home/user")));
        assert_eq!(servers[1].url, "http://localhost:8889/");
    }

    #[test]
    fn test_classic_notebook_dir_alias() {
        let tmp = TempDir::new().unwrap();
        let body = json!({
            "url": "http://localhost:8890/",
            "notebook_dir": "/srv/notebooks",
            "pid": 7,
        });
        std::fs::write(tmp.path().join("nbserver-7.json"), body.to_string()).unwrap();

        let servers = RuntimeDirServers::new(tmp.path())
            .without_pid_check()
            .list();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].root_dir, Some(PathBuf::from("/srv/notebooks")));
        assert!(servers[0].info_file.ends_with("nbserver-7.json"));
    }

    #[cfg(unix)]
    #[test]
    fn test_dead_pids_are_dropped() {
        let tmp = TempDir::new().unwrap();
        write_server_file(
            tmp.path(),
            "jpserver-1.json",
            "http://localhost:8888/",
            std::process::id(),
        );
        write_server_file(tmp.path(), "jpserver-2.json", "http://localhost:8889/", 0);

        let servers = RuntimeDirServers::new(tmp.path()).list();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].pid, std::process::id());
    }
}
