//! HTTP control surface for the hosting application: submit transactions,
//! trigger mining and read the chain back.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use ledger_core::{Block, Transaction};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::node::Node;
use crate::peers::PeerInfo;

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Serialize)]
struct Head {
    height: usize,
    hash: Option<String>,
    valid: bool,
}

#[derive(Serialize)]
struct NotFound {
    error: String,
}

#[derive(Deserialize)]
pub struct TxIn {
    /// Caller-chosen id, e.g. `cv_42`; a random one is assigned when absent.
    #[serde(default)]
    pub transaction_id: Option<String>,
    pub from_address: String,
    #[serde(default)]
    pub to_address: String,
    pub data: String,
    pub signature: String,
}

#[derive(Serialize)]
struct TxOut {
    accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    tx: Transaction,
}

#[derive(Serialize)]
struct Mined {
    mined: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    block: Option<Block>,
}

pub fn router(node: Node) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/chain", get(chain))
        .route("/chain/head", get(head))
        .route("/block/{hash}", get(block_by_hash))
        .route("/pending", get(pending))
        .route("/peers", get(peers))
        .route("/tx", post(submit_tx))
        .route("/mine", post(mine))
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn chain(State(node): State<Node>) -> Json<Vec<Block>> {
    Json(node.ledger().chain())
}

async fn head(State(node): State<Node>) -> Json<Head> {
    let ledger = node.ledger();
    Json(Head {
        height: ledger.height(),
        hash: ledger.latest_block().map(|b| b.hash),
        valid: ledger.is_local_chain_valid(),
    })
}

async fn block_by_hash(
    State(node): State<Node>,
    Path(hash): Path<String>,
) -> Result<Json<Block>, (StatusCode, Json<NotFound>)> {
    node.ledger().block_by_hash(&hash).map(Json).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(NotFound {
                error: format!("no block with hash {hash}"),
            }),
        )
    })
}

async fn pending(State(node): State<Node>) -> Json<Vec<Transaction>> {
    Json(node.ledger().pending())
}

async fn peers(State(node): State<Node>) -> Json<Vec<PeerInfo>> {
    Json(node.peers())
}

async fn submit_tx(
    State(node): State<Node>,
    Json(input): Json<TxIn>,
) -> (StatusCode, Json<TxOut>) {
    let mut tx = Transaction::new(input.from_address, input.to_address, input.data, input.signature);
    if let Some(id) = input.transaction_id.filter(|id| !id.is_empty()) {
        tx.transaction_id = id;
    }
    match node.create_and_broadcast_transaction(tx.clone()) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(TxOut {
                accepted: true,
                reason: None,
                tx,
            }),
        ),
        Err(rejected) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(TxOut {
                accepted: false,
                reason: Some(rejected.to_string()),
                tx,
            }),
        ),
    }
}

async fn mine(State(node): State<Node>) -> Json<Mined> {
    let block = node.mine_and_broadcast().await;
    Json(Mined {
        mined: block.is_some(),
        block,
    })
}
