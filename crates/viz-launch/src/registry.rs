//! Port-keyed registry of launched servers.
//!
//! A [`LaunchManager`] is created once by the hosting integration and lives as
//! long as the notebook session. It holds at most one live server per port:
//! launching on an occupied port stops the previous server first. Launches on
//! the same port are serialized; launches on different ports do not block
//! each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use log::{debug, info};
use tokio::sync::Mutex;

use crate::error::LaunchError;
use crate::server::{ServerHandle, DEFAULT_TERMINATE_GRACE};

type Slot = Arc<Mutex<Option<ServerHandle>>>;

pub struct LaunchManager {
    slots: StdMutex<HashMap<u16, Slot>>,
    terminate_grace: Duration,
}

impl Default for LaunchManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LaunchManager {
    pub fn new() -> Self {
        Self {
            slots: StdMutex::new(HashMap::new()),
            terminate_grace: DEFAULT_TERMINATE_GRACE,
        }
    }

    /// How long a replaced server gets between SIGTERM and SIGKILL.
    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }

    fn slot(&self, port: u16) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(port).or_default().clone()
    }

    /// Stop whatever this registry runs on `port`, then start a new server
    /// with `start` and record it.
    ///
    /// If `start` fails the port is left without an entry.
    pub async fn launch_or_replace<F>(
        &self,
        port: u16,
        start: F,
    ) -> Result<ServerHandle, LaunchError>
    where
        F: FnOnce() -> Result<ServerHandle, LaunchError>,
    {
        let slot = self.slot(port);
        let mut entry = slot.lock().await;

        if let Some(previous) = entry.take() {
            if previous.is_alive().await {
                info!("[registry] Replacing server on port {}", port);
                if let Err(e) = previous.terminate(self.terminate_grace).await {
                    // Still ours; keep tracking it.
                    *entry = Some(previous);
                    return Err(e.into());
                }
            } else {
                debug!("[registry] Previous server on port {} already exited", port);
            }
        }

        let handle = start()?;
        *entry = Some(handle.clone());
        Ok(handle)
    }

    /// The server recorded for `port`, alive or not.
    pub async fn get(&self, port: u16) -> Option<ServerHandle> {
        let slot = self.existing_slot(port)?;
        let entry = slot.lock().await;
        entry.clone()
    }

    /// Whether this registry has a server entry for `port`.
    pub async fn contains(&self, port: u16) -> bool {
        self.get(port).await.is_some()
    }

    /// Ports that currently have an entry, in ascending order.
    pub async fn ports(&self) -> Vec<u16> {
        let slots: Vec<(u16, Slot)> = {
            let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.iter().map(|(port, slot)| (*port, slot.clone())).collect()
        };
        let mut ports = Vec::new();
        for (port, slot) in slots {
            if slot.lock().await.is_some() {
                ports.push(port);
            }
        }
        ports.sort_unstable();
        ports
    }

    /// Lowest port in `start..=end` whose recorded server is still running.
    pub async fn first_live_port(&self, start: u16, end: u16) -> Option<u16> {
        for port in self.ports().await {
            if port < start || port > end {
                continue;
            }
            if let Some(handle) = self.get(port).await {
                if handle.is_alive().await {
                    return Some(port);
                }
            }
        }
        None
    }

    /// Stop and forget the server on `port`. Returns whether there was one.
    pub async fn stop(&self, port: u16) -> Result<bool, LaunchError> {
        let Some(slot) = self.existing_slot(port) else {
            return Ok(false);
        };
        let mut entry = slot.lock().await;
        let Some(handle) = entry.take() else {
            return Ok(false);
        };
        if let Err(e) = handle.terminate(self.terminate_grace).await {
            *entry = Some(handle);
            return Err(e.into());
        }
        Ok(true)
    }

    /// Stop every recorded server.
    pub async fn stop_all(&self) -> Result<(), LaunchError> {
        for port in self.ports().await {
            self.stop(port).await?;
        }
        Ok(())
    }

    fn existing_slot(&self, port: u16) -> Option<Slot> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(&port).cloned()
    }
}
