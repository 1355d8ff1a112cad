//! Error types for rotation operations

use upstream::UpstreamError;

/// Errors from rotation operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No eligible key remains; the message is a JSON summary of pool counts.
    #[error("pool exhausted: {0}")]
    PoolExhausted(String),

    /// A reported key (or key index) is not part of the pool.
    #[error("unknown key: {0}")]
    UnknownKey(String),

    /// The wrapped operation failed and rotation gave up.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// Result alias for rotation operations.
pub type Result<T> = std::result::Result<T, Error>;
