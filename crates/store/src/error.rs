use lfsvault_core::Oid;
use thiserror::Error;

/// Errors that can occur during blob storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The repository is not in the configured allowlist.
    #[error("unknown repository: {0}")]
    UnknownRepo(String),

    /// The requested blob does not exist.
    #[error("blob not found: {0}")]
    NotFound(Oid),

    /// The received bytes do not hash to the declared object id.
    #[error("digest mismatch for {oid}: received bytes hash to {actual}")]
    DigestMismatch {
        /// The object id the client declared.
        oid: Oid,
        /// What the received bytes actually hash to.
        actual: String,
    },

    /// An underlying filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
