//! viz-launch - Start a visualization server from inside a notebook session.
//!
//! The launcher picks a free port, starts the server as a background process
//! (replacing any earlier server this session started on the same port),
//! works out the externally reachable URL for the notebook host, and renders
//! a link back into the notebook. When no display capability is available the
//! link is printed as plain text instead.
//!
//! Two notebook hosts are understood:
//!
//! - managed clusters that expose ports through a driver-proxy URL
//!   (`https://{host}/driver-proxy/o/{workspace}/{cluster}/{port}/`)
//! - local Jupyter servers with a port proxy installed
//!   (`{server_url}proxy/{port}/`)

use serde::{Deserialize, Serialize};

pub mod cluster;
pub mod display;
pub mod error;
pub mod jupyter;
pub mod launcher;
pub mod port;
pub mod probe;
pub mod proxy_url;
pub mod registry;
pub mod server;
pub mod settings;

pub use error::{DisplayUnavailable, LaunchError};
pub use launcher::{LaunchOutcome, LaunchRequest, LaunchState, Launcher};
pub use registry::LaunchManager;
pub use server::ServerHandle;

/// Port used when the caller does not ask for one.
pub const DEFAULT_PORT: u16 = 4141;

/// The notebook host the launcher is running inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKind {
    /// Hosted cluster reachable only through its driver proxy.
    ManagedCluster,
    /// Local Jupyter server with a port proxy extension.
    LocalKernel,
    Unknown,
}

impl std::fmt::Display for HostKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostKind::ManagedCluster => write!(f, "managed_cluster"),
            HostKind::LocalKernel => write!(f, "local_kernel"),
            HostKind::Unknown => write!(f, "unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_kind_display() {
        assert_eq!(HostKind::ManagedCluster.to_string(), "managed_cluster");
        assert_eq!(HostKind::LocalKernel.to_string(), "local_kernel");
        assert_eq!(HostKind::Unknown.to_string(), "unknown");
    }

    #[test]
    fn test_host_kind_serde() {
        assert_eq!(
            serde_json::to_string(&HostKind::ManagedCluster).unwrap(),
            "\"managed_cluster\""
        );
        assert_eq!(
            serde_json::from_str::<HostKind>("\"local_kernel\"").unwrap(),
            HostKind::LocalKernel
        );
    }
}
