//! launch-viz CLI entry point.
//!
//! Starts the visualization server for a project, shows its link for the
//! current notebook host, and stays in the foreground until the server exits
//! or the user interrupts.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use viz_launch::display::{DisplayDataRenderer, DisplayDispatcher, HtmlRenderer};
use viz_launch::jupyter::{RunningServers, RuntimeDirServers};
use viz_launch::launcher::terminate_grace;
use viz_launch::settings::{load_settings, load_settings_from, LaunchSettings};
use viz_launch::{proxy_url, LaunchManager, LaunchRequest, Launcher};

#[derive(Parser, Debug)]
#[command(name = "launch-viz")]
#[command(about = "Launch Kedro-Viz from a notebook session and link to it")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Settings file (default: <config dir>/viz-launch/settings.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Launch the server (default if no command specified)
    Launch {
        /// Port to try first (default: 4141 or the configured port)
        #[arg(long)]
        port: Option<u16>,

        /// Project directory (default: current directory)
        #[arg(long)]
        project_path: Option<PathBuf>,

        /// How to show the link
        #[arg(long, value_enum, default_value_t = DisplayMode::Text)]
        display: DisplayMode,
    },

    /// Show the detected host and the URL a port would get
    Detect {
        #[arg(long)]
        port: Option<u16>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List running local Jupyter servers
    Servers {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum DisplayMode {
    /// evcxr HTML content block
    Html,
    /// Jupyter display_data JSON
    Rich,
    /// Plain text only
    Text,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let settings = match cli.config {
        Some(ref path) => load_settings_from(path)?,
        None => load_settings()?,
    };

    match cli.command {
        None => launch(&settings, None, None, DisplayMode::Text).await,
        Some(Commands::Launch {
            port,
            project_path,
            display,
        }) => launch(&settings, port, project_path, display).await,
        Some(Commands::Detect { port, json }) => detect(&settings, port, json),
        Some(Commands::Servers { json }) => servers(json),
    }
}

async fn launch(
    settings: &LaunchSettings,
    port: Option<u16>,
    project_path: Option<PathBuf>,
    display: DisplayMode,
) -> anyhow::Result<()> {
    let project_path = match project_path {
        Some(path) => path,
        None => std::env::current_dir()?,
    };

    let dispatcher = match display {
        DisplayMode::Html => DisplayDispatcher::new().with_renderer(HtmlRenderer::stdout()),
        DisplayMode::Rich => DisplayDispatcher::new()
            .with_renderer(HtmlRenderer::stdout())
            .with_rich_display(DisplayDataRenderer::stdout()),
        DisplayMode::Text => DisplayDispatcher::new(),
    };

    let launcher = Launcher::from_settings(settings, None)?.with_display(dispatcher);
    let manager = LaunchManager::new().with_terminate_grace(terminate_grace(settings));

    let mut request = LaunchRequest::new(project_path);
    if let Some(port) = port {
        request = request.with_port(port);
    }

    let outcome = launcher.launch(&manager, request).await?;

    tokio::select! {
        status = outcome.handle.wait() => {
            match status? {
                Some(status) => info!("Kedro-Viz exited: {}", status),
                None => info!("Kedro-Viz exited"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping Kedro-Viz...");
            manager.stop_all().await?;
        }
    }

    Ok(())
}

fn detect(settings: &LaunchSettings, port: Option<u16>, json: bool) -> anyhow::Result<()> {
    let port = port.unwrap_or(settings.default_port);
    let launcher = Launcher::from_settings(settings, None)?;
    let detection = launcher.detect();
    let url = proxy_url::build(&detection, port)?;

    if json {
        let output = serde_json::json!({
            "host": detection.kind(),
            "port": port,
            "url": url,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Host: {}", detection.kind());
        println!("Port: {}", port);
        println!("URL:  {}", url.as_deref().unwrap_or("(none)"));
    }
    Ok(())
}

fn servers(json: bool) -> anyhow::Result<()> {
    let servers = RuntimeDirServers::default();
    let running = servers.list();

    if json {
        println!("{}", serde_json::to_string_pretty(&running)?);
        return Ok(());
    }

    if running.is_empty() {
        println!(
            "No running Jupyter servers found in {}",
            servers.runtime_dir().display()
        );
        return Ok(());
    }
    for server in &running {
        let root = server
            .root_dir
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        println!("{:>8}  {}  {}", server.pid, server.url, root);
    }
    Ok(())
}
