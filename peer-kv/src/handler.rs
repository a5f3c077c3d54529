//! Per-connection request loop.
//!
//! Each accepted socket gets its own [`ConnectionHandler`] clone running on its
//! own task. The loop reads one request line, applies it to the store, forwards
//! client mutations to the peer, and only then writes the response line.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::peer::PeerPropagator;
use crate::protocol::{Command, ProtocolError, Request, Response, read_line, write_line};
use crate::store::KeyValueStore;

#[derive(Clone)]
pub struct ConnectionHandler {
    store: Arc<dyn KeyValueStore>,
    propagator: Arc<PeerPropagator>,
}

impl ConnectionHandler {
    pub fn new(store: Arc<dyn KeyValueStore>, propagator: Arc<PeerPropagator>) -> Self {
        Self { store, propagator }
    }

    /// Serves `stream` until the remote side closes it.
    ///
    /// A reset or abrupt close from the client ends the loop normally; the store is
    /// unaffected because every operation completes atomically under its lock.
    pub async fn run(self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        match self.serve(&mut reader, &mut writer).await {
            Ok(()) => {
                debug!(%peer, "connection closed");
                Ok(())
            }
            Err(err) if is_disconnect(&err) => {
                debug!(%peer, error = ?err, "connection dropped by client");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Reads request lines from `reader` and answers each with one line on `writer`.
    pub async fn serve<R, W>(&self, reader: &mut R, writer: &mut W) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            let response = match read_line(reader).await {
                Ok(Some(line)) => self.handle_line(&line).await,
                Ok(None) => return Ok(()),
                // Oversized lines are skipped by the reader; answer and keep going.
                Err(err) => match ProtocolError::from_io(&err) {
                    Some(protocol_err) => {
                        debug!(error = %protocol_err, "rejected request");
                        Response::from(protocol_err.clone())
                    }
                    None => return Err(err),
                },
            };
            write_line(writer, &response.to_string()).await?;
        }
    }

    /// Parses, applies, and (for client mutations) propagates a single request.
    ///
    /// Propagation runs before the response is returned, so client latency includes
    /// the peer attempt. Its outcome never changes the response.
    pub async fn handle_line(&self, line: &str) -> Response {
        let request = match Request::parse(line) {
            Ok(request) => request,
            Err(err) => {
                debug!(line, error = %err, "rejected request");
                return err.into();
            }
        };

        let response = self.apply(&request.command);
        if request.should_propagate() {
            self.propagator.propagate(line).await;
        } else if request.command.is_mutation() {
            info!(key = request.command.key(), "applied update from peer");
        }

        response
    }

    fn apply(&self, command: &Command) -> Response {
        match command {
            Command::Get { key } => match self.store.get(key) {
                Some(value) => Response::Value(value),
                None => Response::NotFound,
            },
            Command::Set { key, value } => {
                self.store.set(key.clone(), value.clone());
                Response::Ok
            }
            Command::Delete { key } => {
                // Deleting an absent key is still a success.
                self.store.delete(key);
                Response::Ok
            }
        }
    }
}

fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}
