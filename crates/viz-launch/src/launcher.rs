//! The launch sequence: port, process, URL, display.
//!
//! ```text
//! Idle -> PortResolved -> ProcessLaunched -> UrlResolved -> Displayed
//!                                                        \-> DisplayFallback
//!                                        \-> Degraded (no URL for this host)
//! ```
//!
//! Each launch runs once to completion; nothing is retried.

use std::io::Write;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use log::{debug, info};

use crate::cluster::ClusterContext;
use crate::display::{stdout_sink, DisplayDispatcher, Sink};
use crate::error::LaunchError;
use crate::jupyter::RuntimeDirServers;
use crate::port::PortAllocator;
use crate::probe::{ClusterProbe, Detection, EnvironmentDetector, LocalKernelProbe};
use crate::proxy_url;
use crate::registry::LaunchManager;
use crate::server::{CommandServer, ServerHandle, VizServer};
use crate::settings::LaunchSettings;
use crate::{HostKind, DEFAULT_PORT};

/// Link text shown in the notebook.
pub const LINK_TEXT: &str = "Launch Kedro-Viz";

/// One user-invoked launch.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub port: Option<u16>,
    pub project_path: PathBuf,
}

impl LaunchRequest {
    pub fn new(project_path: impl Into<PathBuf>) -> Self {
        Self {
            port: None,
            project_path: project_path.into(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    Idle,
    PortResolved,
    ProcessLaunched,
    UrlResolved,
    /// The link was rendered in the notebook.
    Displayed,
    /// No display capability; the link was printed as text.
    DisplayFallback,
    /// The server runs but no URL could be determined for this host.
    Degraded,
}

/// Result of a launch that got as far as starting the server.
#[derive(Debug, Clone)]
pub struct LaunchOutcome {
    pub port: u16,
    pub host: HostKind,
    pub url: Option<String>,
    pub state: LaunchState,
    pub handle: ServerHandle,
}

/// Sequences port allocation, the process registry, host detection, URL
/// construction and display.
pub struct Launcher {
    default_port: u16,
    bind_host: String,
    allocator: PortAllocator,
    detector: EnvironmentDetector,
    server: Box<dyn VizServer>,
    display: DisplayDispatcher,
    output: Sink,
}

impl Launcher {
    pub fn new(server: impl VizServer + 'static, detector: EnvironmentDetector) -> Self {
        Self {
            default_port: DEFAULT_PORT,
            bind_host: "127.0.0.1".to_string(),
            allocator: PortAllocator::default(),
            detector,
            server: Box::new(server),
            display: DisplayDispatcher::new(),
            output: stdout_sink(),
        }
    }

    /// Build a launcher from settings, with an optional cluster context
    /// injected by the hosting integration (settings' own context is used
    /// otherwise).
    pub fn from_settings(
        settings: &LaunchSettings,
        cluster: Option<Arc<dyn ClusterContext>>,
    ) -> anyhow::Result<Self> {
        let ip: IpAddr = settings
            .host
            .parse()
            .with_context(|| format!("Invalid host address '{}'", settings.host))?;

        let cluster = cluster.or_else(|| {
            settings
                .cluster
                .clone()
                .map(|ctx| Arc::new(ctx) as Arc<dyn ClusterContext>)
        });
        let cluster_probe = match cluster {
            Some(ctx) => ClusterProbe::with_context(ctx),
            None => ClusterProbe::new(),
        };
        let local_probe =
            LocalKernelProbe::new(&settings.python, Arc::new(RuntimeDirServers::default()));

        let server =
            CommandServer::new(settings.server_command.clone()).quiet(settings.quiet_server);

        Ok(Self::new(server, EnvironmentDetector::standard(cluster_probe, local_probe))
            .with_default_port(settings.default_port)
            .with_bind_host(settings.host.clone())
            .with_allocator(PortAllocator::new(ip, settings.scan_limit)))
    }

    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    /// Host passed to the server command.
    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    pub fn with_allocator(mut self, allocator: PortAllocator) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn with_display(mut self, display: DisplayDispatcher) -> Self {
        self.display = display;
        self
    }

    /// Where plain-text fallback and status lines go.
    pub fn with_output(mut self, output: Sink) -> Self {
        self.output = output;
        self
    }

    /// Run host detection alone.
    pub fn detect(&self) -> Detection {
        self.detector.detect()
    }

    /// Launch (or relaunch) the server and present its link.
    pub async fn launch(
        &self,
        manager: &LaunchManager,
        request: LaunchRequest,
    ) -> Result<LaunchOutcome, LaunchError> {
        let mut state = LaunchState::Idle;
        let requested = request.port.unwrap_or(self.default_port);

        // Reuse a port this registry already serves in the scan range; scanning
        // would skip it because our own server holds it.
        let end = self.allocator.scan_end(requested);
        let port = match manager.first_live_port(requested, end).await {
            Some(port) => {
                debug!("[launch] Port {} is ours, replacing its server", port);
                port
            }
            None => self.allocator.allocate(requested)?,
        };
        advance(&mut state, LaunchState::PortResolved);

        let project_path = &request.project_path;
        let handle = manager
            .launch_or_replace(port, || self.server.start(project_path, &self.bind_host, port))
            .await?;
        advance(&mut state, LaunchState::ProcessLaunched);

        let detection = self.detector.detect();
        let host = detection.kind();
        let url = proxy_url::build(&detection, port)?;

        match url {
            None => {
                self.print(&format!(
                    "Kedro-Viz started on port {}, but no URL could be determined \
                     for this environment.",
                    port
                ))?;
                advance(&mut state, LaunchState::Degraded);
            }
            Some(ref url) => {
                advance(&mut state, LaunchState::UrlResolved);
                let text = link_text(url);
                match self.display.render_link(host, &link_html(url), &text) {
                    Ok(()) => advance(&mut state, LaunchState::Displayed),
                    Err(e) => {
                        debug!("[launch] {}, printing link", e);
                        self.print(&text)?;
                        advance(&mut state, LaunchState::DisplayFallback);
                    }
                }
            }
        }

        info!("[launch] Kedro-Viz on port {} ({} host)", port, host);
        Ok(LaunchOutcome {
            port,
            host,
            url,
            state,
            handle,
        })
    }

    fn print(&self, line: &str) -> Result<(), LaunchError> {
        let mut out = self.output.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(out, "{}", line)?;
        out.flush()?;
        Ok(())
    }
}

fn advance(state: &mut LaunchState, next: LaunchState) {
    debug!("[launch] {:?} -> {:?}", state, next);
    *state = next;
}

/// Anchor element for a server URL.
pub fn link_html(url: &str) -> String {
    format!("<a href='{}' target='_blank'>{}</a>", url, LINK_TEXT)
}

/// Plain-text form of the link.
pub fn link_text(url: &str) -> String {
    format!("{}: {}", LINK_TEXT, url)
}

/// Grace period from settings.
pub fn terminate_grace(settings: &LaunchSettings) -> Duration {
    Duration::from_millis(settings.terminate_grace_ms)
}
