//! Externally reachable URL construction per host.

use log::{debug, info};
use url::Url;

use crate::cluster::ClusterContext;
use crate::error::LaunchError;
use crate::jupyter::RunningServers;
use crate::probe::Detection;

/// Build the URL a browser should open to reach `port` on this host.
///
/// Returns `Ok(None)` when the host has no known way to expose the port.
/// Cluster context failures are returned as errors, never masked.
pub fn build(detection: &Detection, port: u16) -> Result<Option<String>, LaunchError> {
    match detection {
        Detection::ManagedCluster(context) => driver_proxy_url(context.as_ref(), port).map(Some),
        Detection::LocalKernel(servers) => local_proxy_url(servers.as_ref(), port),
        Detection::Unknown => Ok(None),
    }
}

/// `https://{host}/driver-proxy/o/{workspace}/{cluster}/{port}/`
pub fn driver_proxy_url(context: &dyn ClusterContext, port: u16) -> Result<String, LaunchError> {
    let host = context.browser_host_name()?;
    let workspace = context.workspace_id()?;
    let cluster = context.cluster_id()?;
    Ok(format!(
        "https://{}/driver-proxy/o/{}/{}/{}/",
        host, workspace, cluster, port
    ))
}

/// `{server_url}proxy/{port}/` using the first running server.
///
/// Which server is "first" is arbitrary when several are running.
pub fn local_proxy_url(
    servers: &dyn RunningServers,
    port: u16,
) -> Result<Option<String>, LaunchError> {
    let running = servers.list();
    let Some(server) = running.first() else {
        debug!("[url] No running Jupyter servers");
        return Ok(None);
    };
    if running.len() > 1 {
        info!(
            "[url] {} Jupyter servers running, using {}",
            running.len(),
            server.url
        );
    }

    let mut base = server.url.clone();
    if !base.ends_with('/') {
        base.push('/');
    }
    let parsed = Url::parse(&base).map_err(|source| LaunchError::InvalidServerUrl {
        url: server.url.clone(),
        source,
    })?;
    let joined = parsed
        .join(&format!("proxy/{}/", port))
        .map_err(|source| LaunchError::InvalidServerUrl {
            url: server.url.clone(),
            source,
        })?;
    Ok(Some(joined.to_string()))
}
