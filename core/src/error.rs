use thiserror::Error;

/// Splitsync error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to decode: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Settings rejected by validator")]
    Validation,

    #[error("Request not supported on this node")]
    UnsupportedRequest,

    #[error("Settings poll already in progress")]
    PollInProgress,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("No free peripheral slot")]
    NodeFull,

    #[error("Join rejected by central: {0}")]
    JoinRejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
