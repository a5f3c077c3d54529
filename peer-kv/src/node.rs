//! Listening socket and accept loop.
//!
//! A [`Node`] owns its listener, its store, and the propagator for its single
//! peer. Every accepted connection is served on an independent task; the accept
//! loop itself never waits on a client.

use std::future::Future;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{info, warn};

use crate::handler::ConnectionHandler;
use crate::peer::{DEFAULT_PEER_TIMEOUT, PeerPropagator};
use crate::store::{KeyValueStore, MemoryStore};

/// Everything a node needs to know at startup.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address to bind for client and peer traffic (e.g. `127.0.0.1:5000`).
    pub listen: SocketAddr,
    /// `host:port` of the neighbour that receives our mutations, if any.
    pub peer: Option<String>,
    /// Upper bound on a single propagation attempt, connect included.
    pub peer_timeout: Duration,
    /// Maximum number of connections served at once. `None` means unbounded.
    pub max_connections: Option<NonZeroUsize>,
}

impl NodeConfig {
    pub fn new(listen: SocketAddr) -> Self {
        Self {
            listen,
            peer: None,
            peer_timeout: DEFAULT_PEER_TIMEOUT,
            max_connections: None,
        }
    }

    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = Some(peer.into());
        self
    }

    pub fn with_peer_timeout(mut self, timeout: Duration) -> Self {
        self.peer_timeout = timeout;
        self
    }

    pub fn with_max_connections(mut self, limit: NonZeroUsize) -> Self {
        self.max_connections = Some(limit);
        self
    }
}

pub struct Node {
    listener: TcpListener,
    handler: ConnectionHandler,
    limit: Option<Arc<Semaphore>>,
}

impl Node {
    /// Binds `config.listen` with a fresh in-memory store.
    ///
    /// A bind failure is returned with context; callers treat it as fatal.
    pub async fn bind(config: NodeConfig) -> Result<Self> {
        Self::bind_with_store(config, Arc::new(MemoryStore::new())).await
    }

    pub async fn bind_with_store(
        config: NodeConfig,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("failed to bind {}", config.listen))?;
        Ok(Self::from_listener(listener, config, store))
    }

    /// Wraps an already bound listener. `config.listen` is ignored.
    pub fn from_listener(
        listener: TcpListener,
        config: NodeConfig,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let propagator = PeerPropagator::new(config.peer, config.peer_timeout);
        Self {
            listener,
            handler: ConnectionHandler::new(store, Arc::new(propagator)),
            limit: config
                .max_connections
                .map(|limit| Arc::new(Semaphore::new(limit.get()))),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` resolves.
    ///
    /// Connections that are already being served keep running after the loop stops.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Node {
            listener,
            handler,
            limit,
        } = self;
        tokio::pin!(shutdown);

        loop {
            // With a cap in place, wait for a free slot before taking another connection.
            let permit = match &limit {
                Some(limit) => select! {
                    _ = &mut shutdown => break,
                    permit = Arc::clone(limit).acquire_owned() => {
                        Some(permit.context("connection limiter closed")?)
                    }
                },
                None => None,
            };

            select! {
                _ = &mut shutdown => break,
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &handler, permit);
                }
            }
        }

        info!("node shutting down");
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    handler: &ConnectionHandler,
    permit: Option<OwnedSemaphorePermit>,
) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, handler, permit),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler(
    stream: TcpStream,
    peer: SocketAddr,
    handler: &ConnectionHandler,
    permit: Option<OwnedSemaphorePermit>,
) {
    info!(%peer, "connection accepted");
    let handler = handler.clone();
    tokio::spawn(async move {
        // Held for the life of the connection; dropping it frees the slot.
        let _permit = permit;
        if let Err(err) = handler.run(stream, peer).await {
            warn!(%peer, error = ?err, "connection closed with error");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_to_standalone_unbounded_node() {
        let config = NodeConfig::new("127.0.0.1:5000".parse().unwrap());
        assert_eq!(config.peer, None);
        assert_eq!(config.max_connections, None);
        assert_eq!(config.peer_timeout, DEFAULT_PEER_TIMEOUT);

        let config = config
            .with_peer("127.0.0.1:5001")
            .with_max_connections(NonZeroUsize::new(4).unwrap())
            .with_peer_timeout(Duration::from_millis(250));
        assert_eq!(config.peer.as_deref(), Some("127.0.0.1:5001"));
        assert_eq!(config.max_connections, NonZeroUsize::new(4));
        assert_eq!(config.peer_timeout, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn bind_conflict_is_an_error() {
        let first = Node::bind(NodeConfig::new("127.0.0.1:0".parse().unwrap()))
            .await
            .expect("first bind");
        let taken = first.local_addr().expect("local addr");

        let second = Node::bind(NodeConfig::new(taken)).await;
        assert!(second.is_err(), "binding an occupied port must fail");
    }
}
