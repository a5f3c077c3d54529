use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::node::NodeConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a key-value node, optionally replicating to one peer.
    Serve(ServeArgs),
    /// Connect to a node and issue commands interactively.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address the node should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub listen: SocketAddr,

    /// Address (host:port) of the peer that receives this node's updates.
    #[arg(long)]
    pub peer: Option<String>,

    /// Give up on a propagation attempt after this many milliseconds.
    #[arg(long, default_value_t = 2000)]
    pub peer_timeout_ms: u64,

    /// Serve at most this many connections at once. Must be at least 1.
    #[arg(long)]
    pub max_connections: Option<NonZeroUsize>,
}

impl ServeArgs {
    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            listen: self.listen,
            peer: self.peer.clone(),
            peer_timeout: Duration::from_millis(self.peer_timeout_ms),
            max_connections: self.max_connections,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of the node to connect to.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub server: String,
}
