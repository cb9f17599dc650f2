//! Listener acquisition and the optional browser launch.

use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, warn};

/// How many consecutive ports are probed before giving up.
pub const MAX_PORT_ATTEMPTS: u16 = 200;

/// Startup failures around the listening socket.
#[derive(Debug, Error)]
pub enum ListenError {
    /// Every candidate port was taken.
    #[error("no free port in {first}..={last}")]
    PortsExhausted {
        /// First port probed.
        first: u16,
        /// Last port probed.
        last: u16,
    },
    /// A bind failed for a reason other than the port being in use.
    #[error("bind failed: {0}")]
    Bind(#[from] std::io::Error),
}

/// Binds `host:port`, walking up through successive ports on conflict.
///
/// Only address-in-use conflicts are retried; anything else (bad host,
/// permission denied) fails immediately.
pub async fn acquire_listener(
    host: &str,
    port: u16,
) -> Result<(TcpListener, SocketAddr), ListenError> {
    let mut last = port;
    for attempt in 0..MAX_PORT_ATTEMPTS {
        let Some(candidate) = port.checked_add(attempt) else {
            break;
        };
        last = candidate;

        match TcpListener::bind((host, candidate)).await {
            Ok(listener) => {
                let addr = listener.local_addr()?;
                if attempt > 0 {
                    debug!(requested = port, bound = candidate, "fell through to a free port");
                }
                return Ok((listener, addr));
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                debug!(port = candidate, "port in use, trying next");
            }
            Err(e) => return Err(ListenError::Bind(e)),
        }
    }

    Err(ListenError::PortsExhausted { first: port, last })
}

/// Best-effort launch of the default browser at `url`.
///
/// Failure only costs the convenience; the server keeps running.
pub fn open_browser(url: &str) {
    #[cfg(target_os = "macos")]
    let result = std::process::Command::new("open").arg(url).spawn();

    #[cfg(target_os = "windows")]
    let result = std::process::Command::new("cmd")
        .args(["/C", "start", "", url])
        .spawn();

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let result = std::process::Command::new("xdg-open").arg(url).spawn();

    if let Err(e) = result {
        warn!(error = %e, url, "could not open a browser");
    }
}
