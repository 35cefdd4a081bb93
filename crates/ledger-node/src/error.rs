use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame of {0} bytes exceeds the wire limit")]
    FrameTooLarge(usize),
    #[error("invalid seed address `{0}`, expected host:port")]
    InvalidSeed(String),
    #[error("node is shutting down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, NodeError>;
