//! Bridge-layer errors.

use thiserror::Error;

/// Errors surfaced by bridge implementations.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge not connected")]
    NotConnected,
    #[error("invalid device serial: {0}")]
    InvalidSerial(String),
    #[error("bridge command failed: {0}")]
    CommandFailed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
