use thiserror::Error;

/// Errors the client raises directly to its caller. Transport-layer
/// failures (bad CRC, bad version, truncated frame) never reach here -
/// they are silently dropped and recovered by retransmission.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid operation name: {0:?}")]
    InvalidOp(String),

    #[error("failed to encode request payload: {0}")]
    EncodeFailed(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("bridge_timeout: {op}")]
    Timeout { op: String },

    #[error("remote error {error}: {detail}")]
    Remote { error: String, detail: String },

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BridgeResult<T> = Result<T, BridgeError>;
