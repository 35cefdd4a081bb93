//! Registry of live connections.
//!
//! Each peer is represented by the sending half of its outbound frame queue;
//! the socket itself is owned by that peer's read and write tasks. The
//! registry has its own lock, independent of the ledger lock, and never holds
//! it across an await.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::message::{encode_frame, Frame, Message};

pub type PeerId = u64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PeerInfo {
    pub id: PeerId,
    pub addr: SocketAddr,
    pub outbound: bool,
}

struct PeerEntry {
    info: PeerInfo,
    outbox: mpsc::UnboundedSender<Frame>,
}

#[derive(Default)]
pub struct PeerRegistry {
    next_id: AtomicU64,
    peers: Mutex<HashMap<PeerId, PeerEntry>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PeerId, PeerEntry>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a connection to `addr`, returning its identity and the queue its
    /// write task drains. `None` if that remote endpoint is already connected.
    pub fn register(
        &self,
        addr: SocketAddr,
        outbound: bool,
    ) -> Option<(PeerInfo, mpsc::UnboundedReceiver<Frame>)> {
        let mut peers = self.lock();
        if peers.values().any(|p| p.info.addr == addr) {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let info = PeerInfo { id, addr, outbound };
        let (outbox, inbox) = mpsc::unbounded_channel();
        peers.insert(
            id,
            PeerEntry {
                info: info.clone(),
                outbox,
            },
        );
        Some((info, inbox))
    }

    /// Drop a peer. Its write task ends once the queue is released.
    pub fn remove(&self, id: PeerId) -> Option<PeerInfo> {
        self.lock().remove(&id).map(|entry| entry.info)
    }

    pub fn contains_addr(&self, addr: &SocketAddr) -> bool {
        self.lock().values().any(|p| p.info.addr == *addr)
    }

    /// Queue `msg` for one peer. `Ok(false)` if the peer is gone.
    pub fn send_to(&self, id: PeerId, msg: &Message) -> Result<bool> {
        let frame = encode_frame(msg)?;
        let peers = self.lock();
        let Some(peer) = peers.get(&id) else {
            debug!(peer = id, kind = %msg.kind, "send to unknown peer dropped");
            return Ok(false);
        };
        Ok(peer.outbox.send(frame).is_ok())
    }

    /// Queue `msg` for every peer except `exclude`. Returns how many peers it
    /// was queued for.
    pub fn broadcast(&self, msg: &Message, exclude: Option<PeerId>) -> Result<usize> {
        let frame = encode_frame(msg)?;
        let peers = self.lock();
        let mut sent = 0;
        for peer in peers.values().filter(|p| Some(p.info.id) != exclude) {
            if peer.outbox.send(frame.clone()).is_ok() {
                sent += 1;
            } else {
                warn!(peer = peer.info.id, addr = %peer.info.addr, "peer write queue closed");
            }
        }
        Ok(sent)
    }

    pub fn snapshot(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self.lock().values().map(|p| p.info.clone()).collect();
        peers.sort_by_key(|p| p.id);
        peers
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Release every peer queue, which closes each connection's write side.
    pub fn clear(&self) {
        self.lock().clear();
    }
}
