//! Sequential free-port scanning.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};

use log::{debug, info, warn};

use crate::error::LaunchError;

/// Default number of ports tried before giving up.
pub const DEFAULT_SCAN_LIMIT: u16 = 1000;

/// Finds the first bindable port at or after a starting point.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    host: IpAddr,
    scan_limit: u16,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            scan_limit: DEFAULT_SCAN_LIMIT,
        }
    }
}

impl PortAllocator {
    pub fn new(host: IpAddr, scan_limit: u16) -> Self {
        Self {
            host,
            scan_limit: scan_limit.max(1),
        }
    }

    /// Return the first free port in `start_at ..= start_at + scan_limit - 1`,
    /// clamped to 65535.
    pub fn allocate(&self, start_at: u16) -> Result<u16, LaunchError> {
        let end = self.scan_end(start_at);

        for port in start_at..=end {
            if self.is_free(port) {
                if port != start_at {
                    info!("[port] Port {} is busy, using {}", start_at, port);
                }
                return Ok(port);
            }
            debug!("[port] Port {} is in use", port);
        }

        warn!("[port] No free port between {} and {}", start_at, end);
        Err(LaunchError::ResourceExhausted {
            start: start_at,
            end,
        })
    }

    /// Last port a scan from `start_at` would try.
    pub fn scan_end(&self, start_at: u16) -> u16 {
        start_at.saturating_add(self.scan_limit - 1)
    }

    /// Whether a listener can currently bind `port` on the configured host.
    ///
    /// The probe listener is dropped immediately, releasing the port.
    pub fn is_free(&self, port: u16) -> bool {
        TcpListener::bind(SocketAddr::new(self.host, port)).is_ok()
    }
}
