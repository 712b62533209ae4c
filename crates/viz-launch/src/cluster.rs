//! Managed-cluster context: the three values needed to build a driver-proxy URL.

use serde::{Deserialize, Serialize};

use crate::error::LaunchError;

/// Set on every managed-cluster driver.
pub const RUNTIME_VERSION_VAR: &str = "DATABRICKS_RUNTIME_VERSION";
pub const BROWSER_HOST_VAR: &str = "DATABRICKS_BROWSER_HOST_NAME";
pub const WORKSPACE_ID_VAR: &str = "DATABRICKS_WORKSPACE_ID";
pub const CLUSTER_ID_VAR: &str = "DATABRICKS_CLUSTER_ID";
/// Older runtimes only export the cluster id under this name.
pub const LEGACY_CLUSTER_ID_VAR: &str = "DB_CLUSTER_ID";

/// Source of managed-cluster identity.
///
/// Each getter may fail; callers must propagate the failure rather than
/// substitute a placeholder.
pub trait ClusterContext: Send + Sync {
    /// Host name the user's browser reaches the workspace on.
    fn browser_host_name(&self) -> Result<String, LaunchError>;
    fn workspace_id(&self) -> Result<String, LaunchError>;
    fn cluster_id(&self) -> Result<String, LaunchError>;
}

/// Fixed context values, supplied by the hosting integration or settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticClusterContext {
    pub browser_host_name: String,
    pub workspace_id: String,
    pub cluster_id: String,
}

impl StaticClusterContext {
    pub fn new(
        browser_host_name: impl Into<String>,
        workspace_id: impl Into<String>,
        cluster_id: impl Into<String>,
    ) -> Self {
        Self {
            browser_host_name: browser_host_name.into(),
            workspace_id: workspace_id.into(),
            cluster_id: cluster_id.into(),
        }
    }
}

impl ClusterContext for StaticClusterContext {
    fn browser_host_name(&self) -> Result<String, LaunchError> {
        non_empty("browserHostName", &self.browser_host_name)
    }

    fn workspace_id(&self) -> Result<String, LaunchError> {
        non_empty("workspaceId", &self.workspace_id)
    }

    fn cluster_id(&self) -> Result<String, LaunchError> {
        non_empty("clusterId", &self.cluster_id)
    }
}

fn non_empty(field: &'static str, value: &str) -> Result<String, LaunchError> {
    if value.trim().is_empty() {
        return Err(LaunchError::ContextRetrievalFailed {
            field,
            message: "value is empty".to_string(),
        });
    }
    Ok(value.to_string())
}

/// Reads the context from the driver's process environment on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvClusterContext;

impl EnvClusterContext {
    /// Whether this process looks like it runs on a managed-cluster driver.
    pub fn is_present() -> bool {
        std::env::var_os(RUNTIME_VERSION_VAR).is_some()
    }
}

impl ClusterContext for EnvClusterContext {
    fn browser_host_name(&self) -> Result<String, LaunchError> {
        read_var("browserHostName", &[BROWSER_HOST_VAR])
    }

    fn workspace_id(&self) -> Result<String, LaunchError> {
        read_var("workspaceId", &[WORKSPACE_ID_VAR])
    }

    fn cluster_id(&self) -> Result<String, LaunchError> {
        read_var("clusterId", &[CLUSTER_ID_VAR, LEGACY_CLUSTER_ID_VAR])
    }
}

fn read_var(field: &'static str, names: &[&str]) -> Result<String, LaunchError> {
    for name in names {
        if let Ok(value) = std::env::var(name) {
            if !value.trim().is_empty() {
                return Ok(value);
            }
        }
    }
    Err(LaunchError::ContextRetrievalFailed {
        field,
        message: format!("none of {} is set", names.join(", ")),
    })
}
