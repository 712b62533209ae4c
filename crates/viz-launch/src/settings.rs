//! Launcher settings persisted as JSON in the user's config directory:
//! - macOS: ~/Library/Application Support/viz-launch/settings.json
//! - Linux: ~/.config/viz-launch/settings.json
//! - Windows: C:\Users\<User>\AppData\Roaming\viz-launch\settings.json
//!
//! Every field has a default, so a partial file or no file at all is valid.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cluster::StaticClusterContext;
use crate::port::DEFAULT_SCAN_LIMIT;
use crate::server::default_server_command;
use crate::DEFAULT_PORT;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchSettings {
    /// Port tried first when none is given.
    pub default_port: u16,
    /// Address the server binds and the port scan checks.
    pub host: String,
    /// How many ports to try before giving up.
    pub scan_limit: u16,
    /// Interpreter used to check for the Jupyter port proxy.
    pub python: PathBuf,
    /// Server command template.
    pub server_command: Vec<String>,
    /// Milliseconds between SIGTERM and SIGKILL when replacing a server.
    pub terminate_grace_ms: u64,
    /// Discard server stdout/stderr.
    pub quiet_server: bool,
    /// Fixed managed-cluster context, used instead of the environment.
    pub cluster: Option<StaticClusterContext>,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            default_port: DEFAULT_PORT,
            host: "127.0.0.1".to_string(),
            scan_limit: DEFAULT_SCAN_LIMIT,
            python: PathBuf::from("python3"),
            server_command: default_server_command(),
            terminate_grace_ms: 5000,
            quiet_server: false,
            cluster: None,
        }
    }
}

/// Get the path to the settings file.
pub fn settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("viz-launch")
        .join("settings.json")
}

/// Load settings from `path`. A missing file gives defaults; an unreadable
/// or malformed one is an error.
pub fn load_settings_from(path: &Path) -> Result<LaunchSettings> {
    if !path.exists() {
        return Ok(LaunchSettings::default());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Invalid settings file {}", path.display()))
}

pub fn load_settings() -> Result<LaunchSettings> {
    load_settings_from(&settings_path())
}
