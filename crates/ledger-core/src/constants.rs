pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
/// Required leading zero hex digits in a sealed block hash.
pub const POW_TARGET_DIFFICULTY: usize = 4;
pub const GENESIS_PREVIOUS_HASH: &str = "0";
/// 2025-01-01T00:00:00Z
pub const GENESIS_TIMESTAMP_SECS: i64 = 1_735_689_600;
