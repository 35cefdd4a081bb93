use std::net::SocketAddr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_LISTEN_ADDR, MINING_INTERVAL_SECS, RECONNECT_INTERVAL_SECS, SEEN_MESSAGES_CAPACITY,
};
use crate::error::{NodeError, Result};

#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Stamped as `Sender` on every outgoing message; messages carrying it are ignored.
    pub node_name: String,
    pub listen_addr: SocketAddr,
    /// `host:port` entries dialed at startup and re-dialed while disconnected.
    pub seeds: Vec<String>,
    pub reconnect_interval: Duration,
    pub mining_interval: Duration,
    /// Size past which the processed-message set is cleared.
    pub seen_capacity: usize,
    pub auto_mine: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_name: "Node A".to_string(),
            listen_addr: DEFAULT_LISTEN_ADDR
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 8888))),
            seeds: Vec::new(),
            reconnect_interval: Duration::from_secs(RECONNECT_INTERVAL_SECS),
            mining_interval: Duration::from_secs(MINING_INTERVAL_SECS),
            seen_capacity: SEEN_MESSAGES_CAPACITY,
            auto_mine: true,
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> Result<()> {
        for seed in &self.seeds {
            parse_seed(seed)?;
        }
        Ok(())
    }
}

/// Split a `host:port` seed entry.
pub fn parse_seed(seed: &str) -> Result<(&str, u16)> {
    let invalid = || NodeError::InvalidSeed(seed.to_string());
    let (host, port) = seed.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host, port))
}
