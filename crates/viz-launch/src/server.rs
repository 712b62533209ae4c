//! The visualization server process.
//!
//! The server is opaque: it is started with a project path, host and port,
//! and afterwards only its liveness is observed.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::error::LaunchError;

/// Command used when settings do not override it.
pub fn default_server_command() -> Vec<String> {
    ["kedro", "viz", "--host", "{host}", "--port", "{port}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Default wait between SIGTERM and SIGKILL.
pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(5);

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Starts visualization servers.
pub trait VizServer: Send + Sync {
    /// Spawn a server in the background and return immediately.
    fn start(
        &self,
        project_path: &Path,
        host: &str,
        port: u16,
    ) -> Result<ServerHandle, LaunchError>;
}

/// Metadata about a started server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub port: u16,
    pub pid: Option<u32>,
    pub project_path: PathBuf,
    pub started_at: DateTime<Utc>,
}

struct ServerProcess {
    info: ServerInfo,
    child: Mutex<Option<Child>>,
    /// Process group ID for cleanup (Unix only)
    #[cfg(unix)]
    process_group_id: Option<i32>,
}

/// Shared handle to a running server. Clones observe the same process.
#[derive(Clone)]
pub struct ServerHandle {
    inner: Arc<ServerProcess>,
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("info", &self.inner.info)
            .finish()
    }
}

impl ServerHandle {
    /// Wrap a spawned child. On Unix the child is expected to lead its own
    /// process group.
    pub fn from_child(child: Child, port: u16, project_path: impl Into<PathBuf>) -> Self {
        let pid = child.id();
        Self {
            inner: Arc::new(ServerProcess {
                info: ServerInfo {
                    port,
                    pid,
                    project_path: project_path.into(),
                    started_at: Utc::now(),
                },
                #[cfg(unix)]
                process_group_id: pid.map(|pid| pid as i32),
                child: Mutex::new(Some(child)),
            }),
        }
    }

    pub fn info(&self) -> &ServerInfo {
        &self.inner.info
    }

    pub fn port(&self) -> u16 {
        self.inner.info.port
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.info.pid
    }

    /// Whether both handles refer to the same process.
    pub fn same_process(&self, other: &ServerHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Local, non-blocking liveness check.
    pub async fn is_alive(&self) -> bool {
        let mut guard = self.inner.child.lock().await;
        match guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Stop the server: SIGTERM to its process group, then SIGKILL once
    /// `grace` has elapsed. Returns once the process has exited.
    pub async fn terminate(&self, grace: Duration) -> io::Result<()> {
        let mut guard = self.inner.child.lock().await;
        let Some(child) = guard.as_mut() else {
            return Ok(());
        };
        if child.try_wait()?.is_some() {
            return Ok(());
        }

        info!(
            "[server] Stopping server on port {} (pid {:?})",
            self.inner.info.port, self.inner.info.pid
        );

        #[cfg(unix)]
        if let Some(pgid) = self.inner.process_group_id {
            signal_group(pgid, nix::sys::signal::Signal::SIGTERM);
        }
        #[cfg(not(unix))]
        child.start_kill()?;

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!("[server] Server on port {} exited: {}", self.inner.info.port, status);
            }
            Err(_) => {
                warn!(
                    "[server] Server on port {} ignored SIGTERM for {:?}, killing",
                    self.inner.info.port, grace
                );
                #[cfg(unix)]
                if let Some(pgid) = self.inner.process_group_id {
                    signal_group(pgid, nix::sys::signal::Signal::SIGKILL);
                }
                child.kill().await?;
            }
        }
        Ok(())
    }

    /// Resolve when the server exits on its own.
    pub async fn wait(&self) -> io::Result<Option<ExitStatus>> {
        loop {
            {
                let mut guard = self.inner.child.lock().await;
                match guard.as_mut() {
                    Some(child) => {
                        if let Some(status) = child.try_wait()? {
                            return Ok(Some(status));
                        }
                    }
                    None => return Ok(None),
                }
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        // The group leader is killed by kill_on_drop; children it spawned are not.
        #[cfg(unix)]
        if let Some(pgid) = self.process_group_id {
            if let Some(child) = self.child.get_mut() {
                if let Ok(None) = child.try_wait() {
                    signal_group(pgid, nix::sys::signal::Signal::SIGKILL);
                    debug!("[server] Killed server on port {} on drop", self.info.port);
                }
            }
        }
    }
}

#[cfg(unix)]
fn signal_group(pgid: i32, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;
    if let Err(e) = killpg(Pid::from_raw(pgid), signal) {
        if e != nix::errno::Errno::ESRCH {
            warn!("[server] Failed to signal process group {}: {}", pgid, e);
        }
    }
}

/// Runs the server as an external command built from a template.
///
/// `{host}`, `{port}` and `{project_path}` are substituted in every argument.
/// The command runs in the project directory.
#[derive(Debug, Clone)]
pub struct CommandServer {
    template: Vec<String>,
    quiet: bool,
}

impl Default for CommandServer {
    fn default() -> Self {
        Self::new(default_server_command())
    }
}

impl CommandServer {
    pub fn new(template: Vec<String>) -> Self {
        Self {
            template,
            quiet: false,
        }
    }

    /// Discard the server's stdout and stderr.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// The argv that would be run for the given values.
    pub fn render_args(&self, project_path: &Path, host: &str, port: u16) -> Vec<String> {
        let port = port.to_string();
        let project = project_path.to_string_lossy();
        self.template
            .iter()
            .map(|arg| {
                arg.replace("{host}", host)
                    .replace("{port}", &port)
                    .replace("{project_path}", &project)
            })
            .collect()
    }
}

impl VizServer for CommandServer {
    fn start(
        &self,
        project_path: &Path,
        host: &str,
        port: u16,
    ) -> Result<ServerHandle, LaunchError> {
        let args = self.render_args(project_path, host, port);
        let Some((program, rest)) = args.split_first() else {
            return Err(LaunchError::ProcessStartFailed {
                port,
                source: io::Error::new(io::ErrorKind::InvalidInput, "server command is empty"),
            });
        };

        let mut cmd = Command::new(program);
        cmd.args(rest)
            .current_dir(project_path)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if self.quiet {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|source| LaunchError::ProcessStartFailed { port, source })?;

        info!(
            "[server] Started {:?} on port {} (pid {:?})",
            program,
            port,
            child.id()
        );
        Ok(ServerHandle::from_child(child, port, project_path))
    }
}
