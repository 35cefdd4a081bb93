use clap::Parser;
use ledger_core::{constants::POW_TARGET_DIFFICULTY, Ledger};
use ledger_node::{api, Node, NodeConfig};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ledger-node")]
#[command(about = "Peer-to-peer node for the minimal ledger")]
struct Args {
    /// Node name, sent as the sender of every message
    #[arg(long, default_value = "Node A")]
    name: String,

    /// P2P address to listen on, e.g. 0.0.0.0:8888
    #[arg(long, default_value = "0.0.0.0:8888")]
    listen: SocketAddr,

    /// Seed peer as host:port (repeatable)
    #[arg(long = "seed")]
    seeds: Vec<String>,

    /// Leading zero hex digits required in a block hash
    #[arg(long, default_value_t = POW_TARGET_DIFFICULTY)]
    difficulty: usize,

    /// Address for the HTTP control API, e.g. 127.0.0.1:8080
    #[arg(long)]
    api: Option<SocketAddr>,

    /// Do not mine pending transactions in the background
    #[arg(long)]
    no_auto_mine: bool,

    #[arg(long, default_value_t = 10)]
    mining_interval_secs: u64,

    #[arg(long, default_value_t = 5)]
    reconnect_interval_secs: u64,
}

impl From<Args> for NodeConfig {
    fn from(args: Args) -> Self {
        NodeConfig {
            node_name: args.name,
            listen_addr: args.listen,
            seeds: args.seeds,
            reconnect_interval: Duration::from_secs(args.reconnect_interval_secs),
            mining_interval: Duration::from_secs(args.mining_interval_secs),
            auto_mine: !args.no_auto_mine,
            ..NodeConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let api_addr = args.api;
    let ledger = Arc::new(Ledger::new(args.difficulty));
    let config = NodeConfig::from(args);
    let node = Node::start(config, ledger).await?;

    if let Some(addr) = api_addr {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("control API listening on http://{addr}");
        let app = api::router(node.clone());
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "control API stopped");
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    node.shutdown();
    Ok(())
}
