//! Error types for pool operations.

use thiserror::Error;

/// Errors produced by the token pool and its data types.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No matching token became available within the selected wait window.
    ///
    /// Distinguishable from other failures so callers can treat it as
    /// "try again later" rather than "permanently broken".
    #[error("timeout occurred while selecting token")]
    SelectionTimeout,
    /// A blocked selection was abandoned through its cancellation token.
    #[error("token selection cancelled")]
    Cancelled,
    /// A token operation referenced a worker id absent from the registry.
    #[error("unknown token `{0}`")]
    UnknownToken(String),
    /// An interest pattern failed to compile.
    #[error("invalid interest pattern `{pattern}`")]
    InvalidPattern {
        /// The offending pattern source.
        pattern: String,
        /// Underlying regex compile error.
        #[source]
        source: regex::Error,
    },
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
