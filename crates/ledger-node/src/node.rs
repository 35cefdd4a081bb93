//! The gossip node runtime.
//!
//! Tasks, all spawned by [`Node::start`] and stopped by [`Node::shutdown`]:
//! - accept loop: registers inbound connections
//! - per connection: a read task feeding the dispatch queue, and a write task
//!   draining that peer's frame queue
//! - dispatch loop: the single consumer of inbound messages
//! - reconnect monitor: re-dials seeds that are not connected
//! - mining loop: mines pending transactions on a blocking thread

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use ledger_core::{Block, Ledger, Transaction, TxRejected};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::message::{decode_payload, read_frame, Frame, Message, MessageType};
use crate::peers::{PeerId, PeerInfo, PeerRegistry};

struct Inbound {
    from: PeerId,
    message: Message,
}

/// Processed-message ids. Cleared wholesale once it grows past its bound,
/// so a duplicate arriving after a clear is processed again.
pub(crate) struct SeenMessages {
    ids: HashSet<String>,
    capacity: usize,
}

impl SeenMessages {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            capacity,
        }
    }

    /// Record `id`; `false` if it was already seen.
    pub(crate) fn insert(&mut self, id: String) -> bool {
        self.ids.insert(id)
    }

    /// Whether `message` should be dispatched. Sync requests and responses
    /// are point to point and repeat legitimately, so only gossip is tracked.
    pub(crate) fn admit(&mut self, message: &Message) -> bool {
        !message.kind.is_gossip() || self.insert(message.id())
    }

    pub(crate) fn prune_if_full(&mut self) {
        if self.ids.len() > self.capacity {
            debug!(entries = self.ids.len(), "clearing processed message ids");
            self.ids.clear();
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }
}

struct NodeInner {
    config: NodeConfig,
    ledger: Arc<Ledger>,
    peers: PeerRegistry,
    local_addr: SocketAddr,
    inbox: mpsc::UnboundedSender<Inbound>,
    shutdown: watch::Sender<bool>,
}

/// Handle to a running node. Cheap to clone.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Bind the listener, ensure the genesis block exists, spawn every
    /// background task and dial the seeds.
    pub async fn start(config: NodeConfig, ledger: Arc<Ledger>) -> Result<Node> {
        config.validate()?;
        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(node = %config.node_name, addr = %local_addr, "node listening");

        ledger.create_genesis();

        let (inbox, inbox_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let node = Node {
            inner: Arc::new(NodeInner {
                config,
                ledger,
                peers: PeerRegistry::new(),
                local_addr,
                inbox,
                shutdown,
            }),
        };

        tokio::spawn(node.clone().accept_loop(listener));
        tokio::spawn(node.clone().dispatch_loop(inbox_rx));
        tokio::spawn(node.clone().reconnect_loop());
        if node.inner.config.auto_mine {
            tokio::spawn(node.clone().mining_loop());
        }
        node.connect_to_seeds();

        Ok(node)
    }

    pub fn name(&self) -> &str {
        &self.inner.config.node_name
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.inner.ledger
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        self.inner.peers.snapshot()
    }

    pub fn peer_count(&self) -> usize {
        self.inner.peers.len()
    }

    /// Stop every loop and close every connection.
    pub fn shutdown(&self) {
        info!(node = %self.name(), "shutting down");
        self.inner.shutdown.send_replace(true);
        self.inner.peers.clear();
    }

    fn is_shutting_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    async fn stopped(mut signal: watch::Receiver<bool>) {
        // An error means the sender is gone, which only happens on teardown.
        let _ = signal.wait_for(|stopped| *stopped).await;
    }

    pub fn broadcast_block(&self, block: &Block, exclude: Option<PeerId>) -> usize {
        let sent = Message::new_block(block, self.name())
            .and_then(|msg| self.inner.peers.broadcast(&msg, exclude));
        match sent {
            Ok(count) => {
                info!(index = block.index, hash = %block.hash, peers = count, "broadcast block");
                count
            }
            Err(e) => {
                error!(index = block.index, error = %e, "failed to broadcast block");
                0
            }
        }
    }

    pub fn broadcast_transaction(&self, tx: &Transaction, exclude: Option<PeerId>) -> usize {
        let sent = Message::new_transaction(tx, self.name())
            .and_then(|msg| self.inner.peers.broadcast(&msg, exclude));
        match sent {
            Ok(count) => {
                debug!(id = %tx.transaction_id, peers = count, "broadcast transaction");
                count
            }
            Err(e) => {
                error!(id = %tx.transaction_id, error = %e, "failed to broadcast transaction");
                0
            }
        }
    }

    /// Entry point for locally created transactions: pool it, then gossip it.
    /// A rejected transaction is not sent anywhere.
    pub fn create_and_broadcast_transaction(
        &self,
        tx: Transaction,
    ) -> std::result::Result<(), TxRejected> {
        self.inner.ledger.add_transaction_to_pending(tx.clone())?;
        self.broadcast_transaction(&tx, None);
        Ok(())
    }

    /// Mine the pending pool on a blocking thread and broadcast the result.
    pub async fn mine_and_broadcast(&self) -> Option<Block> {
        let ledger = Arc::clone(&self.inner.ledger);
        match tokio::task::spawn_blocking(move || ledger.mine_pending()).await {
            Ok(Some(block)) => {
                self.broadcast_block(&block, None);
                Some(block)
            }
            Ok(None) => None,
            Err(e) => {
                error!(error = %e, "mining task failed");
                None
            }
        }
    }

    /// Dial `addr`, register the connection and ask the peer for its chain.
    /// `Ok(None)` if that endpoint is already connected.
    pub async fn connect(&self, addr: &str) -> Result<Option<PeerInfo>> {
        if self.is_shutting_down() {
            return Err(NodeError::Shutdown);
        }
        let stream = TcpStream::connect(addr).await?;
        let remote = stream.peer_addr()?;
        let Some(info) = self.register_connection(stream, remote, true) else {
            return Ok(None);
        };
        info!(seed = addr, peer = info.id, "connected to seed");
        self.inner
            .peers
            .send_to(info.id, &Message::sync_chain(self.name()))?;
        Ok(Some(info))
    }

    fn connect_to_seeds(&self) {
        for seed in self.inner.config.seeds.clone() {
            let node = self.clone();
            tokio::spawn(async move {
                if let Err(e) = node.connect(&seed).await {
                    warn!(seed = %seed, error = %e, "could not connect to seed");
                }
            });
        }
    }

    async fn is_seed_connected(&self, seed: &str) -> bool {
        match lookup_host(seed).await {
            Ok(mut addrs) => addrs.any(|addr| self.inner.peers.contains_addr(&addr)),
            Err(e) => {
                debug!(seed, error = %e, "seed lookup failed");
                false
            }
        }
    }

    fn register_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        outbound: bool,
    ) -> Option<PeerInfo> {
        let Some((info, outbox)) = self.inner.peers.register(addr, outbound) else {
            debug!(addr = %addr, "already connected to endpoint, closing duplicate");
            return None;
        };
        info!(
            peer = info.id,
            addr = %addr,
            outbound,
            peers = self.peer_count(),
            "peer connected"
        );
        let (reader, writer) = stream.into_split();
        tokio::spawn(self.clone().write_loop(info.clone(), writer, outbox));
        tokio::spawn(self.clone().read_loop(info.clone(), reader));
        Some(info)
    }

    fn disconnect(&self, peer: &PeerInfo) {
        if self.inner.peers.remove(peer.id).is_some() {
            info!(
                peer = peer.id,
                addr = %peer.addr,
                peers = self.peer_count(),
                "peer disconnected"
            );
        }
    }

    async fn accept_loop(self, listener: TcpListener) {
        let stop = self.inner.shutdown.subscribe();
        tokio::pin! {
            let stopped = Self::stopped(stop);
        }
        loop {
            let accepted = tokio::select! {
                _ = &mut stopped => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, addr)) => {
                    self.register_connection(stream, addr, false);
                }
                Err(e) => warn!(error = %e, "failed to accept connection"),
            }
        }
        debug!("accept loop stopped");
    }

    async fn read_loop(self, peer: PeerInfo, mut reader: OwnedReadHalf) {
        let stop = self.inner.shutdown.subscribe();
        tokio::pin! {
            let stopped = Self::stopped(stop);
        }
        loop {
            let frame = tokio::select! {
                _ = &mut stopped => break,
                frame = read_frame(&mut reader) => frame,
            };
            let payload = match frame {
                Ok(Some(payload)) => payload,
                Ok(None) => {
                    debug!(peer = peer.id, "peer closed connection");
                    break;
                }
                Err(e) => {
                    warn!(peer = peer.id, error = %e, "read failed");
                    break;
                }
            };
            match decode_payload(&payload) {
                Ok(message) => {
                    let inbound = Inbound {
                        from: peer.id,
                        message,
                    };
                    if self.inner.inbox.send(inbound).is_err() {
                        break;
                    }
                }
                Err(e) => warn!(peer = peer.id, error = %e, "discarding malformed message"),
            }
        }
        self.disconnect(&peer);
    }

    async fn write_loop(
        self,
        peer: PeerInfo,
        mut writer: OwnedWriteHalf,
        mut outbox: mpsc::UnboundedReceiver<Frame>,
    ) {
        while let Some(frame) = outbox.recv().await {
            if let Err(e) = writer.write_all(&frame).await {
                error!(peer = peer.id, addr = %peer.addr, error = %e, "write failed");
                self.disconnect(&peer);
                break;
            }
        }
        let _ = writer.shutdown().await;
    }

    async fn dispatch_loop(self, mut inbox: mpsc::UnboundedReceiver<Inbound>) {
        let stop = self.inner.shutdown.subscribe();
        tokio::pin! {
            let stopped = Self::stopped(stop);
        }
        let mut seen = SeenMessages::new(self.inner.config.seen_capacity);
        loop {
            let inbound = tokio::select! {
                _ = &mut stopped => break,
                inbound = inbox.recv() => match inbound {
                    Some(inbound) => inbound,
                    None => break,
                },
            };
            self.process(&mut seen, inbound);
            if inbox.is_empty() {
                seen.prune_if_full();
            }
        }
        debug!("dispatch loop stopped");
    }

    fn process(&self, seen: &mut SeenMessages, Inbound { from, message }: Inbound) {
        if message.sender == self.name() {
            return;
        }
        if !seen.admit(&message) {
            debug!(kind = %message.kind, sender = %message.sender, "message already processed");
            return;
        }

        match &message.kind {
            MessageType::NewBlock => self.on_new_block(from, &message),
            MessageType::NewTransaction => self.on_new_transaction(from, &message),
            MessageType::SyncChain => self.on_sync_chain(from),
            MessageType::ChainResponse => self.on_chain_response(&message),
            MessageType::Unknown(kind) => {
                debug!(kind = %kind, sender = %message.sender, "ignoring unknown message type");
            }
        }
    }

    fn on_new_block(&self, from: PeerId, message: &Message) {
        let block = match message.block() {
            Ok(block) => block,
            Err(e) => {
                warn!(sender = %message.sender, error = %e, "undecodable block");
                return;
            }
        };
        info!(index = block.index, sender = %message.sender, "received block");
        if self.inner.ledger.add_block_from_peer(block.clone()) {
            self.broadcast_block(&block, Some(from));
        } else {
            warn!(
                index = block.index,
                sender = %message.sender,
                "block rejected, requesting chain sync"
            );
            self.send(from, &Message::sync_chain(self.name()));
        }
    }

    fn on_new_transaction(&self, from: PeerId, message: &Message) {
        let tx = match message.transaction() {
            Ok(tx) => tx,
            Err(e) => {
                warn!(sender = %message.sender, error = %e, "undecodable transaction");
                return;
            }
        };
        match self.inner.ledger.add_transaction_to_pending(tx.clone()) {
            Ok(()) => {
                self.broadcast_transaction(&tx, Some(from));
            }
            Err(rejected) => {
                debug!(id = %tx.transaction_id, sender = %message.sender, %rejected, "not relaying transaction");
            }
        }
    }

    fn on_sync_chain(&self, from: PeerId) {
        let chain = self.inner.ledger.chain();
        match Message::chain_response(&chain, self.name()) {
            Ok(response) => {
                debug!(peer = from, blocks = chain.len(), "answering chain sync");
                self.send(from, &response);
            }
            Err(e) => error!(error = %e, "failed to encode chain"),
        }
    }

    fn on_chain_response(&self, message: &Message) {
        let chain = match message.chain() {
            Ok(chain) => chain,
            Err(e) => {
                warn!(sender = %message.sender, error = %e, "undecodable chain");
                return;
            }
        };
        if self.inner.ledger.replace_chain(chain) {
            info!(
                sender = %message.sender,
                height = self.inner.ledger.height(),
                "chain updated from peer"
            );
        }
    }

    fn send(&self, to: PeerId, message: &Message) {
        if let Err(e) = self.inner.peers.send_to(to, message) {
            error!(peer = to, kind = %message.kind, error = %e, "failed to send message");
        }
    }

    async fn reconnect_loop(self) {
        let stop = self.inner.shutdown.subscribe();
        tokio::pin! {
            let stopped = Self::stopped(stop);
        }
        let mut ticker = interval(self.inner.config.reconnect_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = &mut stopped => break,
                _ = ticker.tick() => {}
            }
            for seed in &self.inner.config.seeds {
                if self.is_seed_connected(seed).await {
                    continue;
                }
                debug!(seed = %seed, "reconnecting to seed");
                if let Err(e) = self.connect(seed).await {
                    debug!(seed = %seed, error = %e, "reconnect failed");
                }
            }
        }
        debug!("reconnect monitor stopped");
    }

    async fn mining_loop(self) {
        let stop = self.inner.shutdown.subscribe();
        tokio::pin! {
            let stopped = Self::stopped(stop);
        }
        info!(interval = ?self.inner.config.mining_interval, "auto-mining started");
        let mut ticker = interval(self.inner.config.mining_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = &mut stopped => break,
                _ = ticker.tick() => {}
            }
            let pending = self.inner.ledger.pending_len();
            if pending == 0 {
                continue;
            }
            info!(pending, "mining pending transactions");
            if let Some(block) = self.mine_and_broadcast().await {
                info!(index = block.index, "mined block broadcast to network");
            }
        }
        debug!("mining loop stopped");
    }
}
