//! Error types for smt_anchor

use thiserror::Error;

/// Result type alias for smt_anchor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in smt_anchor operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The persisted tree is structurally inconsistent. Never repaired.
    #[error("Tree invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Key {key} does not fit in a {key_length}-bit tree")]
    InvalidKey { key: u64, key_length: u32 },

    #[error("Record is being processed: {0}")]
    Busy(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Proof generation failed: {0}")]
    Proof(String),

    #[error("Invalid database file: {0}")]
    InvalidFile(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Whether retrying on the next reconciliation tick may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_transient() {
        assert!(Error::Unavailable("rpc timeout".into()).is_transient());
        assert!(!Error::Ledger("reverted".into()).is_transient());
        assert!(!Error::InvariantViolation("two roots".into()).is_transient());
    }
}
