//! Best-effort forwarding of mutations to the configured neighbour.
//!
//! Every propagation opens a fresh TCP connection, writes one marked request
//! line, and closes it again. Nothing is queued, retried, or acknowledged: if the
//! peer is down the two nodes simply diverge.

use std::future::Future;
use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::protocol::{PROPAGATE_MARKER, write_line};

pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(2);

/// Result of one propagation attempt. Never surfaced to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// No peer configured.
    Skipped,
    /// The line was written and the connection closed cleanly.
    Delivered,
    /// Connecting or sending failed; the failure was logged and dropped.
    Failed,
}

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("failed to connect to peer {addr}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to send to peer {addr}")]
    Send {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("peer {addr} did not accept the update within {timeout:?}")]
    Timeout { addr: String, timeout: Duration },
}

#[derive(Debug, Clone)]
pub struct PeerPropagator {
    peer: Option<String>,
    timeout: Duration,
}

impl PeerPropagator {
    /// `peer` is a `host:port` string; hostnames are resolved on every attempt.
    pub fn new(peer: Option<String>, timeout: Duration) -> Self {
        Self { peer, timeout }
    }

    /// A propagator that never contacts anyone.
    pub fn disabled() -> Self {
        Self::new(None, DEFAULT_PEER_TIMEOUT)
    }

    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    /// Forwards `line` (a client request, verbatim) behind the propagate marker.
    ///
    /// The whole attempt, connect included, is bounded by the configured timeout.
    /// Errors are logged here and never returned.
    pub async fn propagate(&self, line: &str) -> Propagation {
        let Some(addr) = self.peer.as_deref() else {
            return Propagation::Skipped;
        };

        self.deliver(addr, line, TcpStream::connect(addr)).await
    }

    /// Runs one attempt over whatever stream `connect` yields.
    async fn deliver<C, S>(&self, addr: &str, line: &str, connect: C) -> Propagation
    where
        C: Future<Output = io::Result<S>>,
        S: AsyncWrite + Unpin,
    {
        let forwarded = format!("{PROPAGATE_MARKER} {}", line.trim());
        let attempt = timeout(self.timeout, send_once(addr, &forwarded, connect)).await;
        let result = match attempt {
            Ok(result) => result,
            Err(_) => Err(PeerError::Timeout {
                addr: addr.to_string(),
                timeout: self.timeout,
            }),
        };

        match result {
            Ok(()) => {
                debug!(peer = %addr, line = %forwarded, "propagated update");
                Propagation::Delivered
            }
            Err(err) => {
                warn!(peer = %addr, error = ?err, "failed to propagate update");
                Propagation::Failed
            }
        }
    }
}

async fn send_once<C, S>(addr: &str, line: &str, connect: C) -> Result<(), PeerError>
where
    C: Future<Output = io::Result<S>>,
    S: AsyncWrite + Unpin,
{
    let mut stream = connect
        .await
        .map_err(|source| PeerError::Connect {
            addr: addr.to_string(),
            source,
        })?;

    let send_error = |source| PeerError::Send {
        addr: addr.to_string(),
        source,
    };
    write_line(&mut stream, line).await.map_err(send_error)?;
    stream.shutdown().await.map_err(send_error)?;
    Ok(())
}
