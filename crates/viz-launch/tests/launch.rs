//! End-to-end launch tests.
//!
//! A long `sleep` stands in for the visualization server, so these only run
//! on Unix.

#![cfg(unix)]

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use viz_launch::cluster::StaticClusterContext;
use viz_launch::display::{CapturedOutput, DisplayDataRenderer, DisplayDispatcher, HtmlRenderer};
use viz_launch::jupyter::RuntimeDirServers;
use viz_launch::probe::{ClusterProbe, EnvironmentDetector, LocalKernelProbe};
use viz_launch::server::{CommandServer, VizServer};
use viz_launch::{HostKind, LaunchError, LaunchManager, LaunchRequest, LaunchState, Launcher};

fn sleeping_server() -> CommandServer {
    CommandServer::new(vec!["sleep".into(), "30".into()]).quiet(true)
}

fn project_dir() -> PathBuf {
    std::env::temp_dir()
}

fn manager() -> LaunchManager {
    LaunchManager::new().with_terminate_grace(Duration::from_secs(2))
}

fn no_local_kernel() -> LocalKernelProbe {
    LocalKernelProbe::new(
        "/nonexistent/python-for-tests",
        Arc::new(RuntimeDirServers::new("/nonexistent/runtime")),
    )
}

fn cluster_detector(ctx: StaticClusterContext) -> EnvironmentDetector {
    EnvironmentDetector::standard(ClusterProbe::with_context(Arc::new(ctx)), no_local_kernel())
}

#[tokio::test]
async fn test_managed_cluster_link_is_rendered() {
    let rendered = CapturedOutput::new();
    let printed = CapturedOutput::new();
    let launcher = Launcher::new(
        sleeping_server(),
        cluster_detector(StaticClusterContext::new("abc.cloud", "1", "9")),
    )
    .with_display(DisplayDispatcher::new().with_renderer(HtmlRenderer::new(rendered.sink())))
    .with_output(printed.sink());
    let manager = manager();

    let outcome = launcher
        .launch(&manager, LaunchRequest::new(project_dir()).with_port(4141))
        .await
        .unwrap();

    assert!(outcome.port >= 4141);
    let expected = format!("https://abc.cloud/driver-proxy/o/1/9/{}/", outcome.port);
    // The exact 4141 URL is also pinned by `proxy_url::tests::test_driver_proxy_template`.
    if outcome.port == 4141 {
        assert_eq!(expected, "https://abc.cloud/driver-proxy/o/1/9/4141/");
    }
    assert_eq!(outcome.host, HostKind::ManagedCluster);
    assert_eq!(outcome.url.as_deref(), Some(expected.as_str()));
    assert_eq!(outcome.state, LaunchState::Displayed);
    assert!(rendered.contents().contains(&format!("href='{}'", expected)));
    assert!(printed.contents().is_empty());
    assert!(outcome.handle.is_alive().await);

    manager.stop_all().await.unwrap();
    assert!(!outcome.handle.is_alive().await);
}

#[tokio::test]
async fn test_unknown_host_is_degraded_success() {
    let printed = CapturedOutput::new();
    let launcher = Launcher::new(sleeping_server(), EnvironmentDetector::new(Vec::new()))
        .with_output(printed.sink());
    let manager = manager();

    let outcome = launcher
        .launch(&manager, LaunchRequest::new(project_dir()).with_port(5000))
        .await
        .unwrap();

    assert_eq!(outcome.host, HostKind::Unknown);
    assert_eq!(outcome.url, None);
    assert_eq!(outcome.state, LaunchState::Degraded);
    assert!(outcome.handle.is_alive().await);
    assert!(printed.contents().contains("no URL could be determined"));

    manager.stop_all().await.unwrap();
}

#[tokio::test]
async fn test_relaunch_replaces_live_server() {
    let launcher = Launcher::new(sleeping_server(), EnvironmentDetector::new(Vec::new()))
        .with_output(CapturedOutput::new().sink());
    let manager = manager();

    let first = launcher
        .launch(&manager, LaunchRequest::new(project_dir()).with_port(4141))
        .await
        .unwrap();
    assert!(first.handle.is_alive().await);

    let second = launcher
        .launch(&manager, LaunchRequest::new(project_dir()).with_port(first.port))
        .await
        .unwrap();

    assert_eq!(second.port, first.port);
    assert!(!first.handle.is_alive().await);
    assert!(second.handle.is_alive().await);
    assert!(!first.handle.same_process(&second.handle));

    let registered = manager.get(first.port).await.unwrap();
    assert!(registered.same_process(&second.handle));

    manager.stop_all().await.unwrap();
}

/// Hold a port with a foreign listener, leaving the next one free.
fn hold_foreign_port() -> TcpListener {
    for _ in 0..50 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        if port < u16::MAX && TcpListener::bind(("127.0.0.1", port + 1)).is_ok() {
            return listener;
        }
    }
    panic!("could not find a free port pair");
}

#[tokio::test]
async fn test_relaunch_reuses_our_port_past_a_busy_one() {
    let foreign = hold_foreign_port();
    let requested = foreign.local_addr().unwrap().port();
    let launcher = Launcher::new(sleeping_server(), EnvironmentDetector::new(Vec::new()))
        .with_output(CapturedOutput::new().sink());
    let manager = manager();

    let first = launcher
        .launch(&manager, LaunchRequest::new(project_dir()).with_port(requested))
        .await
        .unwrap();
    assert_eq!(first.port, requested + 1);

    let second = launcher
        .launch(&manager, LaunchRequest::new(project_dir()).with_port(requested))
        .await
        .unwrap();

    assert_eq!(second.port, first.port);
    assert!(!first.handle.is_alive().await);
    assert!(second.handle.is_alive().await);
    assert_eq!(manager.ports().await, vec![first.port]);

    manager.stop_all().await.unwrap();
}

#[tokio::test]
async fn test_missing_display_falls_back_to_text() {
    let printed = CapturedOutput::new();
    let launcher = Launcher::new(
        sleeping_server(),
        cluster_detector(StaticClusterContext::new("abc.cloud", "1", "9")),
    )
    .with_output(printed.sink());
    let manager = manager();

    let outcome = launcher
        .launch(&manager, LaunchRequest::new(project_dir()))
        .await
        .unwrap();

    assert_eq!(outcome.state, LaunchState::DisplayFallback);
    assert_eq!(
        printed.contents(),
        format!(
            "Launch Kedro-Viz: https://abc.cloud/driver-proxy/o/1/9/{}/\n",
            outcome.port
        )
    );

    manager.stop_all().await.unwrap();
}

#[tokio::test]
async fn test_context_failure_is_surfaced() {
    let launcher = Launcher::new(
        sleeping_server(),
        cluster_detector(StaticClusterContext::new("abc.cloud", "", "9")),
    )
    .with_output(CapturedOutput::new().sink());
    let manager = manager();

    let result = launcher
        .launch(&manager, LaunchRequest::new(project_dir()))
        .await;

    assert!(matches!(
        result,
        Err(LaunchError::ContextRetrievalFailed {
            field: "workspaceId",
            ..
        })
    ));

    manager.stop_all().await.unwrap();
}

#[tokio::test]
async fn test_start_failure_leaves_no_entry() {
    let launcher = Launcher::new(
        CommandServer::new(vec!["/nonexistent/viz-server".into()]),
        EnvironmentDetector::new(Vec::new()),
    )
    .with_output(CapturedOutput::new().sink());
    let manager = manager();

    let result = launcher
        .launch(&manager, LaunchRequest::new(project_dir()).with_port(4141))
        .await;

    assert!(matches!(result, Err(LaunchError::ProcessStartFailed { .. })));
    assert!(manager.ports().await.is_empty());
}

#[tokio::test]
async fn test_local_kernel_uses_rich_display() {
    let runtime = TempDir::new().unwrap();
    let server_file = json!({
        "url": "http://localhost:8888/",
        "base_url": "/",
        "pid": std::process::id(),
        "port": 8888,
    });
    std::fs::write(
        runtime.path().join(format!("jpserver-{}.json", std::process::id())),
        server_file.to_string(),
    )
    .unwrap();

    let html = CapturedOutput::new();
    let rich = CapturedOutput::new();
    // `true` stands in for a Python that can import the proxy module.
    let local = LocalKernelProbe::new("true", Arc::new(RuntimeDirServers::new(runtime.path())));
    let launcher = Launcher::new(
        sleeping_server(),
        EnvironmentDetector::new(vec![Box::new(local)]),
    )
    .with_display(
        DisplayDispatcher::new()
            .with_renderer(HtmlRenderer::new(html.sink()))
            .with_rich_display(DisplayDataRenderer::new(rich.sink())),
    )
    .with_output(CapturedOutput::new().sink());
    let manager = manager();

    let outcome = launcher
        .launch(&manager, LaunchRequest::new(project_dir()).with_port(4141))
        .await
        .unwrap();

    let expected = format!("http://localhost:8888/proxy/{}/", outcome.port);
    assert_eq!(outcome.host, HostKind::LocalKernel);
    assert_eq!(outcome.url.as_deref(), Some(expected.as_str()));
    assert_eq!(outcome.state, LaunchState::Displayed);
    assert!(html.contents().is_empty());
    assert!(rich.contents().contains(&expected));

    manager.stop_all().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_launches_on_one_port_keep_one_alive() {
    let manager = Arc::new(manager());
    let server = Arc::new(sleeping_server());
    let project = project_dir();

    let launch =
        |manager: Arc<LaunchManager>, server: Arc<CommandServer>, project: PathBuf| async move {
            manager
                .launch_or_replace(6123, || server.start(&project, "127.0.0.1", 6123))
                .await
                .unwrap()
        };

    let (a, b) = tokio::join!(
        launch(manager.clone(), server.clone(), project.clone()),
        launch(manager.clone(), server.clone(), project.clone()),
    );

    let alive = [a.is_alive().await, b.is_alive().await];
    assert_eq!(alive.iter().filter(|alive| **alive).count(), 1);
    assert_eq!(manager.ports().await, vec![6123]);

    manager.stop_all().await.unwrap();
    assert!(!a.is_alive().await);
    assert!(!b.is_alive().await);
}
