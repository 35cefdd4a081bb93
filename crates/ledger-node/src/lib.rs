//! Gossip node for the minimal ledger: TCP framing, peer lifecycle, flood
//! broadcast and background mining around a shared [`ledger_core::Ledger`].

pub mod api;
pub mod config;
pub mod constants;
pub mod error;
pub mod message;
pub mod node;
pub mod peers;

pub use config::NodeConfig;
pub use error::{NodeError, Result};
pub use message::{Message, MessageType};
pub use node::Node;
pub use peers::{PeerId, PeerInfo, PeerRegistry};
