//! Pool errors.

use thiserror::Error;

/// Errors surfaced by the device pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The caller broke the API contract (double init, wrong device kind,
    /// freeing an unallocated device). The operation fails without touching
    /// pool state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A device operation could not complete.
    #[error("device not available: {0}")]
    DeviceNotAvailable(String),

    /// A bounded wait expired.
    #[error("timed out: {0}")]
    Timeout(String),

    /// A blocking wait was cancelled.
    #[error("cancelled")]
    Cancelled,

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;
