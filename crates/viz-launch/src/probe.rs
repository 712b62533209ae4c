//! Host detection.
//!
//! Each supported host has a [`HostProbe`]. The [`EnvironmentDetector`] asks
//! them in a fixed priority order (managed cluster first, then local kernel)
//! and the first match wins. Probes only read state; a probe that fails is
//! logged and treated as "not this host".

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;

use log::{debug, warn};

use crate::cluster::{ClusterContext, EnvClusterContext};
use crate::jupyter::RunningServers;
use crate::HostKind;

/// Module whose presence means the local server can proxy arbitrary ports.
pub const PROXY_MODULE: &str = "jupyter_server_proxy";

/// A detected host together with the context needed to build its URL.
#[derive(Clone)]
pub enum Detection {
    ManagedCluster(Arc<dyn ClusterContext>),
    LocalKernel(Arc<dyn RunningServers>),
    Unknown,
}

impl Detection {
    pub fn kind(&self) -> HostKind {
        match self {
            Detection::ManagedCluster(_) => HostKind::ManagedCluster,
            Detection::LocalKernel(_) => HostKind::LocalKernel,
            Detection::Unknown => HostKind::Unknown,
        }
    }
}

impl std::fmt::Debug for Detection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Detection({})", self.kind())
    }
}

/// Result of asking one probe about the current process.
#[derive(Debug)]
pub enum ProbeOutcome {
    Matched(Detection),
    NotMatched,
    ProbeFailed(String),
}

pub trait HostProbe: Send + Sync {
    fn kind(&self) -> HostKind;
    fn probe(&self) -> ProbeOutcome;
}

/// Matches when a cluster context was injected or the driver environment is present.
#[derive(Clone, Default)]
pub struct ClusterProbe {
    injected: Option<Arc<dyn ClusterContext>>,
}

impl ClusterProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a context supplied by the hosting integration ahead of the environment.
    pub fn with_context(context: Arc<dyn ClusterContext>) -> Self {
        Self {
            injected: Some(context),
        }
    }
}

impl HostProbe for ClusterProbe {
    fn kind(&self) -> HostKind {
        HostKind::ManagedCluster
    }

    fn probe(&self) -> ProbeOutcome {
        if let Some(ref context) = self.injected {
            return ProbeOutcome::Matched(Detection::ManagedCluster(context.clone()));
        }
        if EnvClusterContext::is_present() {
            return ProbeOutcome::Matched(Detection::ManagedCluster(Arc::new(EnvClusterContext)));
        }
        ProbeOutcome::NotMatched
    }
}

/// Matches when the proxy module is importable by the configured Python.
#[derive(Clone)]
pub struct LocalKernelProbe {
    python: PathBuf,
    servers: Arc<dyn RunningServers>,
}

impl LocalKernelProbe {
    pub fn new(python: impl Into<PathBuf>, servers: Arc<dyn RunningServers>) -> Self {
        Self {
            python: python.into(),
            servers,
        }
    }
}

impl HostProbe for LocalKernelProbe {
    fn kind(&self) -> HostKind {
        HostKind::LocalKernel
    }

    fn probe(&self) -> ProbeOutcome {
        let status = Command::new(&self.python)
            .args(["-c", &format!("import {}", PROXY_MODULE)])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(s) if s.success() => {
                ProbeOutcome::Matched(Detection::LocalKernel(self.servers.clone()))
            }
            Ok(_) => ProbeOutcome::NotMatched,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("[probe] Python interpreter {:?} not found", self.python);
                ProbeOutcome::NotMatched
            }
            Err(e) => ProbeOutcome::ProbeFailed(format!(
                "failed to run {:?}: {}",
                self.python, e
            )),
        }
    }
}

/// Runs host probes in priority order.
pub struct EnvironmentDetector {
    probes: Vec<Box<dyn HostProbe>>,
}

impl EnvironmentDetector {
    /// Probes are tried in the order given.
    pub fn new(probes: Vec<Box<dyn HostProbe>>) -> Self {
        Self { probes }
    }

    /// The standard order: managed cluster, then local kernel.
    pub fn standard(cluster: ClusterProbe, local: LocalKernelProbe) -> Self {
        Self::new(vec![Box::new(cluster), Box::new(local)])
    }

    pub fn detect(&self) -> Detection {
        for probe in &self.probes {
            match probe.probe() {
                ProbeOutcome::Matched(detection) => {
                    debug!("[probe] Detected host {}", detection.kind());
                    return detection;
                }
                ProbeOutcome::NotMatched => {
                    debug!("[probe] Not a {} host", probe.kind());
                }
                ProbeOutcome::ProbeFailed(reason) => {
                    warn!("[probe] {} probe failed: {}", probe.kind(), reason);
                }
            }
        }
        Detection::Unknown
    }
}
