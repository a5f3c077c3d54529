use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use peer_kv::{
    cli::{Cli, Command},
    client,
    node::Node,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => {
            let node = Node::bind(args.node_config()).await?;
            let addr = node.local_addr()?;
            info!("node listening on {}", addr);
            match args.peer.as_deref() {
                Some(peer) => info!(%peer, "replicating updates to peer"),
                None => info!("no peer configured; running standalone"),
            }
            if let Err(err) = node.run_until_ctrl_c().await {
                warn!("node exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}
