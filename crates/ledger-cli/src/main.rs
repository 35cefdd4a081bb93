use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use reqwest::StatusCode;
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ledger-cli")]
#[command(about = "CLI client for a ledger node's control API")]
struct Cli {
    /// Node control API base URL
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    node: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a transaction to the node's pending pool
    Submit {
        /// Transaction id, e.g. cv_42; the node assigns one when omitted
        #[arg(long)]
        id: Option<String>,
        /// Submitting party
        #[arg(long)]
        from: String,
        /// Recipient, may be empty
        #[arg(long, default_value = "")]
        to: String,
        /// Opaque payload, e.g. a document hash
        #[arg(long)]
        data: String,
        /// Opaque signature, must be non-empty
        #[arg(long)]
        signature: String,
    },
    /// Mine the pending pool now
    Mine,
    /// Print the full chain
    Chain,
    /// Print chain height, tip hash and validity
    Head,
    /// Look up an on-chain block by its hash
    Block {
        /// Block hash, lowercase hex
        hash: String,
    },
    /// Print the pending pool
    Pending,
    /// Print connected peers
    Peers,
}

#[derive(Serialize)]
struct TxIn {
    #[serde(skip_serializing_if = "Option::is_none")]
    transaction_id: Option<String>,
    from_address: String,
    to_address: String,
    data: String,
    signature: String,
}

/// Pretty-print a JSON body; anything else is shown as received.
fn render_body(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| serde_json::to_string_pretty(&value).ok())
        .unwrap_or_else(|| body.to_string())
}

fn check_status(status: StatusCode) -> Result<()> {
    if !status.is_success() {
        bail!("node returned {status}");
    }
    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<()> {
    let status = res.status();
    let body = res.text().await?;
    println!("{}", render_body(&body));
    debug!(%status, "request complete");
    check_status(status)
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.node.trim_end_matches('/');

    let res = match cli.cmd {
        Command::Submit {
            id,
            from,
            to,
            data,
            signature,
        } => {
            let tx = TxIn {
                transaction_id: id,
                from_address: from,
                to_address: to,
                data,
                signature,
            };
            client.post(format!("{base}/tx")).json(&tx).send().await?
        }
        Command::Mine => client.post(format!("{base}/mine")).send().await?,
        Command::Chain => client.get(format!("{base}/chain")).send().await?,
        Command::Head => client.get(format!("{base}/chain/head")).send().await?,
        Command::Block { hash } => client.get(format!("{base}/block/{hash}")).send().await?,
        Command::Pending => client.get(format!("{base}/pending")).send().await?,
        Command::Peers => client.get(format!("{base}/peers")).send().await?,
    };
    print_response(res).await
}
