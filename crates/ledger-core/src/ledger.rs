//! The mutex-guarded chain and pending pool.
//!
//! Every public operation takes the one ledger lock for its whole duration,
//! except [`Ledger::mine_pending`], which snapshots the tip and pool under the
//! lock, searches for a nonce without it, and re-acquires it only to append.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::constants::POW_TARGET_DIFFICULTY;
use crate::{calculate_hash, chain, mine, Block, Transaction};

/// Why a transaction was kept out of the pending pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxRejected {
    #[error("transaction is missing `{0}`")]
    MissingField(&'static str),
    #[error("transaction {0} is already pending or on-chain")]
    Duplicate(String),
}

#[derive(Default)]
struct LedgerState {
    chain: Vec<Block>,
    pending: Vec<Transaction>,
    /// Ids of every transaction included in `chain`.
    mined_ids: HashSet<String>,
}

impl LedgerState {
    fn append(&mut self, block: Block) {
        self.mined_ids
            .extend(block.transactions.iter().map(|t| t.transaction_id.clone()));
        self.chain.push(block);
        self.prune_pending();
    }

    fn replace(&mut self, blocks: Vec<Block>) {
        self.mined_ids = blocks
            .iter()
            .flat_map(|b| b.transactions.iter().map(|t| t.transaction_id.clone()))
            .collect();
        self.chain = blocks;
        self.prune_pending();
    }

    fn prune_pending(&mut self) {
        let mined = &self.mined_ids;
        self.pending.retain(|t| !mined.contains(&t.transaction_id));
    }

    fn is_known(&self, transaction_id: &str) -> bool {
        self.mined_ids.contains(transaction_id)
            || self.pending.iter().any(|t| t.transaction_id == transaction_id)
    }
}

pub struct Ledger {
    state: Mutex<LedgerState>,
    difficulty: usize,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(POW_TARGET_DIFFICULTY)
    }
}

impl Ledger {
    /// An empty ledger; call [`Ledger::create_genesis`] before use.
    pub fn new(difficulty: usize) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            difficulty,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    /// Append the fixed genesis block if the chain is empty. Idempotent.
    /// Returns whether a block was added.
    pub fn create_genesis(&self) -> bool {
        let mut state = self.lock();
        if !state.chain.is_empty() {
            return false;
        }
        let genesis = chain::genesis_block();
        info!(hash = %genesis.hash, "created genesis block");
        state.append(genesis);
        true
    }

    pub fn latest_block(&self) -> Option<Block> {
        self.lock().chain.last().cloned()
    }

    pub fn chain(&self) -> Vec<Block> {
        self.lock().chain.clone()
    }

    /// The on-chain block whose hash is `hash`, for verifying a record.
    pub fn block_by_hash(&self, hash: &str) -> Option<Block> {
        self.lock().chain.iter().find(|b| b.hash == hash).cloned()
    }

    /// Re-validate the local chain end to end.
    pub fn is_local_chain_valid(&self) -> bool {
        chain::is_valid_chain(&self.lock().chain, self.difficulty)
    }

    pub fn height(&self) -> usize {
        self.lock().chain.len()
    }

    pub fn pending(&self) -> Vec<Transaction> {
        self.lock().pending.clone()
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn hash(&self, block: &Block) -> String {
        calculate_hash(
            block.index,
            &block.timestamp,
            &block.transactions,
            &block.previous_hash,
            block.nonce,
        )
    }

    pub fn is_valid_block(&self, block: &Block) -> bool {
        chain::is_valid_block(block, self.difficulty)
    }

    pub fn is_valid_chain(&self, blocks: &[Block]) -> bool {
        chain::is_valid_chain(blocks, self.difficulty)
    }

    /// Queue a transaction for the next mined block.
    ///
    /// Rejections are logged and returned as a value; nothing is raised.
    pub fn add_transaction_to_pending(&self, tx: Transaction) -> Result<(), TxRejected> {
        let missing = if tx.from_address.is_empty() {
            Some("from_address")
        } else if tx.signature.is_empty() {
            Some("signature")
        } else if tx.data.is_empty() {
            Some("data")
        } else {
            None
        };
        if let Some(field) = missing {
            warn!(id = %tx.transaction_id, field, "rejected transaction with empty field");
            return Err(TxRejected::MissingField(field));
        }

        let mut state = self.lock();
        if state.is_known(&tx.transaction_id) {
            debug!(id = %tx.transaction_id, "rejected duplicate transaction");
            return Err(TxRejected::Duplicate(tx.transaction_id));
        }
        debug!(id = %tx.transaction_id, from = %tx.from_address, "transaction pending");
        state.pending.push(tx);
        Ok(())
    }

    /// Mine every pending transaction into a block on top of the current tip.
    ///
    /// Returns `None` when the pool is empty, the chain has no tip, or the tip
    /// moved while the nonce search ran (the candidate is then discarded and
    /// the leftover transactions stay pending). Blocks for the whole search.
    pub fn mine_pending(&self) -> Option<Block> {
        let candidate = {
            let state = self.lock();
            if state.pending.is_empty() {
                return None;
            }
            let tip = state.chain.last()?;
            Block::candidate(tip.index + 1, tip.hash.clone(), state.pending.clone())
        };

        let mined = mine::mine_block(candidate, self.difficulty);

        let mut state = self.lock();
        match state.chain.last() {
            Some(tip) if tip.hash == mined.previous_hash => {}
            _ => {
                warn!(index = mined.index, "tip advanced during mining, discarding candidate");
                return None;
            }
        }
        state.append(mined.clone());
        Some(mined)
    }

    /// Accept a block gossiped by a peer if it extends the local tip.
    ///
    /// `false` for duplicates and for blocks that do not link to the tip; the
    /// latter usually means this node is behind and should sync.
    pub fn add_block_from_peer(&self, block: Block) -> bool {
        let mut state = self.lock();

        let Some(tip) = state.chain.last() else {
            if chain::is_valid_genesis(&block) {
                info!(hash = %block.hash, "accepted genesis block from peer");
                state.append(block);
                return true;
            }
            warn!(index = block.index, "rejected non-genesis block on empty chain");
            return false;
        };
        let (tip_index, tip_hash) = (tip.index, tip.hash.clone());

        if state.chain.iter().any(|b| b.hash == block.hash) {
            debug!(index = block.index, hash = %block.hash, "block already on chain");
            return false;
        }
        if block.previous_hash != tip_hash || block.index != tip_index + 1 {
            warn!(
                index = block.index,
                tip = tip_index,
                previous_hash = %block.previous_hash,
                "block does not extend local tip"
            );
            return false;
        }
        if !chain::is_valid_block(&block, self.difficulty) {
            warn!(index = block.index, hash = %block.hash, "block failed hash or work check");
            return false;
        }

        info!(index = block.index, hash = %block.hash, "accepted block from peer");
        state.append(block);
        true
    }

    /// Longest valid chain wins. Length is the only weight; accumulated work
    /// is not compared.
    pub fn replace_chain(&self, candidate: Vec<Block>) -> bool {
        let mut state = self.lock();
        if candidate.len() <= state.chain.len() {
            debug!(
                candidate = candidate.len(),
                local = state.chain.len(),
                "candidate chain not longer, keeping local chain"
            );
            return false;
        }
        if !chain::is_valid_chain(&candidate, self.difficulty) {
            warn!(candidate = candidate.len(), "rejected invalid candidate chain");
            return false;
        }
        info!(
            old = state.chain.len(),
            new = candidate.len(),
            "replaced local chain"
        );
        state.replace(candidate);
        true
    }
}
