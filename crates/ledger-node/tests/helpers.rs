#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ledger_core::Ledger;
use ledger_node::message::{decode_payload, read_frame, write_frame};
use ledger_node::{Message, Node, NodeConfig};
use tokio::net::TcpStream;

pub const DIFFICULTY: usize = 2;
pub const WAIT: Duration = Duration::from_secs(10);

pub fn test_config(name: &str, seeds: Vec<String>) -> NodeConfig {
    NodeConfig {
        node_name: name.to_string(),
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        seeds,
        reconnect_interval: Duration::from_millis(200),
        mining_interval: Duration::from_millis(200),
        auto_mine: false,
        ..NodeConfig::default()
    }
}

pub async fn start_with(config: NodeConfig) -> Node {
    let ledger = Arc::new(Ledger::new(DIFFICULTY));
    Node::start(config, ledger).await.expect("node starts")
}

pub async fn start_node(name: &str, seeds: Vec<String>) -> Node {
    start_with(test_config(name, seeds)).await
}

pub fn seed_of(node: &Node) -> String {
    node.local_addr().to_string()
}

/// Poll `check` until it holds or `WAIT` elapses.
pub async fn wait_until<F: Fn() -> bool>(check: F) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// Reserve a local port that nothing is listening on.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe");
    listener.local_addr().expect("probe addr").port()
}

/// A bare TCP client speaking the wire protocol, for poking a node directly.
pub struct RawPeer {
    stream: TcpStream,
}

impl RawPeer {
    pub async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.expect("raw connect"),
        }
    }

    pub async fn send(&mut self, msg: &Message) {
        write_frame(&mut self.stream, msg).await.expect("raw send");
    }

    pub async fn send_bytes(&mut self, payload: &[u8]) {
        use tokio::io::AsyncWriteExt;
        self.stream
            .write_all(&(payload.len() as u32).to_le_bytes())
            .await
            .expect("raw header");
        self.stream.write_all(payload).await.expect("raw payload");
    }

    pub async fn recv(&mut self) -> Option<Message> {
        let payload = tokio::time::timeout(WAIT, read_frame(&mut self.stream))
            .await
            .ok()?
            .ok()??;
        decode_payload(&payload).ok()
    }

    pub async fn recv_within(&mut self, limit: Duration) -> Option<Message> {
        let payload = tokio::time::timeout(limit, read_frame(&mut self.stream))
            .await
            .ok()?
            .ok()??;
        decode_payload(&payload).ok()
    }
}
