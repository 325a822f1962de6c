//! MediaSync Error Types

use thiserror::Error;

use crate::id::{AssetId, NodeId};

/// Result type alias for MediaSync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Body returned to clients for an unpaired source/target request
pub const ILLEGAL_PAIR_MESSAGE: &str = "Illegal source-target combination.";

/// MediaSync error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Store errors
    #[error("Store error: {0}")]
    Store(String),

    #[error("Asset {asset} not found on node {node}")]
    AssetNotFound { node: NodeId, asset: AssetId },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Replication errors
    #[error("Illegal source-target combination: {source_node} -> {target}")]
    IllegalPair { source_node: NodeId, target: NodeId },

    #[error("Replication requested for not-original asset {asset} on node {node}")]
    ProvenanceViolation { node: NodeId, asset: AssetId },

    #[error("Ingest to node {target} failed: {message}")]
    Ingest { target: NodeId, message: String },

    // Batch client errors
    #[error("Request timed out: {0}")]
    TransportTimeout(String),

    #[error("Replication stagnated with {not_replicated} items left")]
    Stagnation { not_replicated: u64 },

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is retryable. The batch client shrinks and
    /// retries on these and fails fast on everything else.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Network(_)
                | Error::TransportTimeout(_)
                | Error::Ingest { .. }
        )
    }

    /// Message shown to a human driving the batch loop.
    ///
    /// Only the illegal-pair case gets its own wording; everything else
    /// points at the server logs.
    pub fn user_message(&self) -> String {
        match self {
            Error::IllegalPair { .. } => {
                "The selected sites do not share media with each other. \
                 Pair them under the site relationships first."
                    .to_string()
            }
            Error::Stagnation { .. } => {
                "Replication is not making progress. Check the server logs for \
                 failing ingests before retrying."
                    .to_string()
            }
            _ => "Replication failed. Please check the server logs for details.".to_string(),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Store(format!("SQLite error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Network("connection reset".into()).is_retryable());
        assert!(Error::TransportTimeout("30s".into()).is_retryable());
        assert!(Error::Ingest { target: NodeId(2), message: "disk full".into() }.is_retryable());

        assert!(!Error::IllegalPair { source_node: NodeId(1), target: NodeId(3) }.is_retryable());
        assert!(!Error::ProvenanceViolation { node: NodeId(1), asset: AssetId(9) }.is_retryable());
        assert!(!Error::Stagnation { not_replicated: 4 }.is_retryable());
        assert!(!Error::Store("locked".into()).is_retryable());
        assert!(!Error::Internal("bug".into()).is_retryable());
    }

    #[test]
    fn test_user_message_distinguishes_illegal_pair() {
        let illegal = Error::IllegalPair { source_node: NodeId(1), target: NodeId(3) };
        let generic = Error::Network("boom".into());
        assert!(illegal.user_message().contains("do not share media"));
        assert!(generic.user_message().contains("server logs"));
        assert_ne!(illegal.user_message(), generic.user_message());
    }

    #[test]
    fn test_error_formatting() {
        let err = Error::AssetNotFound { node: NodeId(4), asset: AssetId(10) };
        assert_eq!(err.to_string(), "Asset 10 not found on node 4");
    }
}
