pub(crate) const FRAME_HEADER_SIZE: usize = 4;
/// Largest payload accepted on the wire. A full chain travels in one frame.
pub const MAX_FRAME_BYTES: usize = 32 * 1024 * 1024;
pub(crate) const SEEN_MESSAGES_CAPACITY: usize = 1000;
pub(crate) const RECONNECT_INTERVAL_SECS: u64 = 5;
pub(crate) const MINING_INTERVAL_SECS: u64 = 10;
pub(crate) const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8888";
