use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub mod constants;
pub mod ledger;
pub mod mine;

pub use ledger::{Ledger, TxRejected};

use constants::{GENESIS_PREVIOUS_HASH, GENESIS_TIMESTAMP_SECS};

/// A signed payload submitted by a client. Identity is `transaction_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Transaction {
    pub transaction_id: String,
    pub from_address: String,
    pub to_address: String,
    pub data: String,
    pub signature: String,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    /// Build a transaction with a fresh random id, stamped now.
    pub fn new(
        from_address: impl Into<String>,
        to_address: impl Into<String>,
        data: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id: Uuid::new_v4().to_string(),
            from_address: from_address.into(),
            to_address: to_address.into(),
            data: data.into(),
            signature: signature.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Block {
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub transactions: Vec<Transaction>,
    pub previous_hash: String,
    pub hash: String,
    pub nonce: u64,
}

impl Block {
    /// An unsealed block at `index` on top of `previous_hash`, stamped now with nonce 0.
    pub fn candidate(index: u64, previous_hash: String, transactions: Vec<Transaction>) -> Self {
        let mut block = Self {
            index,
            timestamp: Utc::now(),
            transactions,
            previous_hash,
            hash: String::new(),
            nonce: 0,
        };
        block.hash = block.compute_hash();
        block
    }

    pub fn compute_hash(&self) -> String {
        calculate_hash(
            self.index,
            &self.timestamp,
            &self.transactions,
            &self.previous_hash,
            self.nonce,
        )
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.previous_hash == GENESIS_PREVIOUS_HASH
    }
}

/// Canonical block hash: SHA-256 over
/// `index ‖ iso8601(timestamp) ‖ json(transactions sorted by id) ‖ previous_hash ‖ nonce`,
/// rendered as lowercase hex.
///
/// The input layout is shared by every node; changing it splits the network.
pub fn calculate_hash(
    index: u64,
    timestamp: &DateTime<Utc>,
    transactions: &[Transaction],
    previous_hash: &str,
    nonce: u64,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(index.to_string().as_bytes());
    hasher.update(
        timestamp
            .to_rfc3339_opts(SecondsFormat::AutoSi, true)
            .as_bytes(),
    );
    hasher.update(canonical_transactions(transactions).as_bytes());
    hasher.update(previous_hash.as_bytes());
    hasher.update(nonce.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// JSON array of the transactions ordered by `transaction_id`, independent of arrival order.
pub fn canonical_transactions(transactions: &[Transaction]) -> String {
    let mut sorted: Vec<&Transaction> = transactions.iter().collect();
    sorted.sort_by(|a, b| a.transaction_id.cmp(&b.transaction_id));
    serde_json::to_string(&sorted).expect("transactions always serialize")
}

pub mod pow {
    /// Number of leading `'0'` hex digits in `hash`.
    pub fn leading_zero_digits(hash: &str) -> usize {
        hash.bytes().take_while(|b| *b == b'0').count()
    }

    pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
        leading_zero_digits(hash) >= difficulty
    }
}

pub mod chain {
    use super::*;

    /// The fixed block 0 every node builds identically. Its hash is computed,
    /// not hard-coded, so it follows the hash function.
    pub fn genesis_block() -> Block {
        let timestamp = DateTime::from_timestamp(GENESIS_TIMESTAMP_SECS, 0).unwrap_or_default();
        let mut genesis = Block {
            index: 0,
            timestamp,
            transactions: vec![],
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            hash: String::new(),
            nonce: 0,
        };
        genesis.hash = genesis.compute_hash();
        genesis
    }

    /// Genesis-shaped and self-consistent. Block 0 carries no proof of work.
    pub fn is_valid_genesis(block: &Block) -> bool {
        block.is_genesis() && block.compute_hash() == block.hash
    }

    /// Hash matches the block's own fields and satisfies the work target.
    /// Transaction signatures are not checked here.
    pub fn is_valid_block(block: &Block, difficulty: usize) -> bool {
        block.compute_hash() == block.hash && pow::meets_difficulty(&block.hash, difficulty)
    }

    pub fn is_valid_chain(blocks: &[Block], difficulty: usize) -> bool {
        let Some(first) = blocks.first() else {
            return false;
        };
        if !is_valid_genesis(first) {
            return false;
        }
        blocks.windows(2).all(|pair| {
            let (prev, block) = (&pair[0], &pair[1]);
            block.previous_hash == prev.hash
                && block.index == prev.index + 1
                && is_valid_block(block, difficulty)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tx(id: &str, data: &str) -> Transaction {
        Transaction {
            transaction_id: id.to_string(),
            from_address: "alice".to_string(),
            to_address: "bob".to_string(),
            data: data.to_string(),
            signature: format!("sig-{id}"),
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    fn fixed_block(transactions: Vec<Transaction>) -> Block {
        let mut block = Block {
            index: 1,
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 0).unwrap(),
            transactions,
            previous_hash: chain::genesis_block().hash,
            hash: String::new(),
            nonce: 7,
        };
        block.hash = block.compute_hash();
        block
    }

    fn mined_chain(len: usize, difficulty: usize) -> Vec<Block> {
        let mut blocks = vec![chain::genesis_block()];
        for i in 1..len {
            let prev = blocks.last().unwrap();
            let candidate = Block::candidate(
                prev.index + 1,
                prev.hash.clone(),
                vec![tx(&format!("tx-{i}"), "payload")],
            );
            blocks.push(mine::mine_block(candidate, difficulty));
        }
        blocks
    }

    #[test]
    fn leading_zero_digits_examples() {
        assert_eq!(pow::leading_zero_digits("abc"), 0);
        assert_eq!(pow::leading_zero_digits("0abc"), 1);
        assert_eq!(pow::leading_zero_digits("000f00"), 3);
        assert_eq!(pow::leading_zero_digits(""), 0);
        assert!(pow::meets_difficulty("00ff", 2));
        assert!(!pow::meets_difficulty("0fff", 2));
        assert!(pow::meets_difficulty("ffff", 0));
    }

    #[test]
    fn block_hash_consistency() {
        let block = fixed_block(vec![tx("a", "one"), tx("b", "two")]);
        let hash1 = block.compute_hash();
        let hash2 = block.compute_hash();
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), constants::HASH_HEX_SIZE);
        assert!(hash1.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn block_hash_ignores_transaction_order() {
        let forward = fixed_block(vec![tx("a", "one"), tx("b", "two"), tx("c", "three")]);
        let shuffled = fixed_block(vec![tx("c", "three"), tx("a", "one"), tx("b", "two")]);
        assert_eq!(forward.hash, shuffled.hash);
    }

    #[test]
    fn block_hash_changes_with_nonce() {
        let mut block = fixed_block(vec![tx("a", "one")]);
        let hash1 = block.compute_hash();
        block.nonce += 1;
        assert_ne!(hash1, block.compute_hash());
    }

    #[test]
    fn block_hash_changes_with_transaction_data() {
        let a = fixed_block(vec![tx("a", "one")]);
        let b = fixed_block(vec![tx("a", "uno")]);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn canonical_transactions_sorted_by_id() {
        let json = canonical_transactions(&[tx("b", "two"), tx("a", "one")]);
        let a = json.find("\"TransactionId\":\"a\"").unwrap();
        let b = json.find("\"TransactionId\":\"b\"").unwrap();
        assert!(a < b);
        assert_eq!(canonical_transactions(&[]), "[]");
    }

    #[test]
    fn genesis_block_example() {
        let genesis = chain::genesis_block();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash, "0");
        assert_eq!(genesis.nonce, 0);
        assert!(genesis.transactions.is_empty());
        assert_eq!(genesis.timestamp.timestamp(), GENESIS_TIMESTAMP_SECS);
        assert_eq!(genesis.hash, genesis.compute_hash());
        assert!(chain::is_valid_genesis(&genesis));
    }

    #[test]
    fn genesis_block_is_reproducible() {
        assert_eq!(chain::genesis_block(), chain::genesis_block());
    }

    #[test]
    fn transaction_serialization_uses_pascal_case() {
        let json = serde_json::to_string(&tx("id-1", "hello")).unwrap();
        assert!(json.starts_with(r#"{"TransactionId":"id-1","FromAddress":"alice","ToAddress":"bob","Data":"hello","Signature":"sig-id-1","Timestamp":"#));
        let back: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tx("id-1", "hello"));
    }

    #[test]
    fn block_serialization_preserves_hash() {
        let block = mined_chain(2, 1).pop().unwrap();
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains("\"PreviousHash\""));
        let back: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block);
        assert_eq!(back.compute_hash(), block.hash);
    }

    #[test]
    fn transaction_new_assigns_unique_ids() {
        let t1 = Transaction::new("alice", "bob", "cv", "sig");
        let t2 = Transaction::new("alice", "bob", "cv", "sig");
        assert_ne!(t1.transaction_id, t2.transaction_id);
        assert!(Uuid::parse_str(&t1.transaction_id).is_ok());
    }

    #[test]
    fn valid_chain_is_valid() {
        let blocks = mined_chain(4, 2);
        assert!(chain::is_valid_chain(&blocks, 2));
    }

    #[test]
    fn empty_chain_is_invalid() {
        assert!(!chain::is_valid_chain(&[], 2));
    }

    #[test]
    fn chain_with_bad_genesis_is_invalid() {
        let mut blocks = mined_chain(2, 1);
        blocks[0].previous_hash = "1".to_string();
        assert!(!chain::is_valid_chain(&blocks, 1));

        let mut blocks = mined_chain(2, 1);
        blocks[0].hash = "deadbeef".to_string();
        assert!(!chain::is_valid_chain(&blocks, 1));
    }

    #[test]
    fn mutating_any_non_genesis_field_invalidates_chain() {
        let difficulty = 2;
        let original = mined_chain(4, difficulty);
        let mutations: [fn(&mut Block); 7] = [
            |b| b.hash = "0".repeat(constants::HASH_HEX_SIZE),
            |b| b.previous_hash = "00ff".to_string(),
            |b| b.nonce += 1,
            |b| b.index += 1,
            |b| b.transactions[0].data.push('!'),
            |b| b.transactions[0].transaction_id.push('x'),
            |b| b.timestamp = b.timestamp + chrono::TimeDelta::seconds(1),
        ];
        for target in 1..original.len() {
            for mutate in &mutations {
                let mut blocks = original.clone();
                mutate(&mut blocks[target]);
                if blocks[target] == original[target] {
                    continue;
                }
                assert!(
                    !chain::is_valid_chain(&blocks, difficulty),
                    "mutation of block {target} went unnoticed"
                );
            }
        }
    }

    #[test]
    fn block_without_work_is_invalid() {
        let mut block = fixed_block(vec![tx("a", "one")]);
        while pow::meets_difficulty(&block.hash, 1) {
            block.nonce += 1;
            block.hash = block.compute_hash();
        }
        assert!(!chain::is_valid_block(&block, 1));
        assert!(chain::is_valid_block(&block, 0));
    }
}
