use crate::{pow::meets_difficulty, Block};
use tracing::{debug, info};

/// Seals `block` by incrementing its nonce from zero until the hash has at
/// least `difficulty` leading zero hex digits.
///
/// Sequential and unbounded; call it off any latency-sensitive path.
pub fn mine_block(mut block: Block, difficulty: usize) -> Block {
    debug!(
        index = block.index,
        transactions = block.transactions.len(),
        difficulty,
        "starting nonce search"
    );
    block.nonce = 0;
    loop {
        let hash = block.compute_hash();
        if meets_difficulty(&hash, difficulty) {
            block.hash = hash;
            break;
        }
        block.nonce = block.nonce.wrapping_add(1);
    }

    info!(
        index = block.index,
        nonce = block.nonce,
        hash = %block.hash,
        "mined block"
    );
    block
}
