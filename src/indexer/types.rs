//! Types exchanged with blockchain indexers

use serde::{Deserialize, Serialize};

/// Lifecycle status reported by the indexer for a transaction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Seen but not yet in a block
    Pending,
    /// Broadcast by this client, not yet seen in a block
    Submitted,
    /// Included in a block
    Confirmed,
    /// Rejected by the network
    Failed,
}

impl TransactionStatus {
    /// Parse the indexer's status string. Unknown strings are treated as pending.
    pub fn from_indexer(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "confirmed" | "included" => TransactionStatus::Confirmed,
            "submitted" => TransactionStatus::Submitted,
            "failed" | "rejected" | "reverted" => TransactionStatus::Failed,
            _ => TransactionStatus::Pending,
        }
    }
}

/// A transaction as returned by the indexer, carrying its serialized bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawTransaction {
    /// Identifier of the currency moved by this transaction.
    pub currency_uids: String,
    /// Status reported by the indexer.
    pub status: TransactionStatus,
    /// Height of the including block, if any.
    pub block_height: Option<u64>,
    /// Block or first-seen timestamp in seconds since the epoch.
    pub timestamp: Option<u64>,
    /// Serialized transaction in the network's transaction format.
    pub data: Vec<u8>,
}

/// Error types for indexer operations
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Indexer returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("No data returned")]
    NoData,

    #[error("Unknown blockchain: {0}")]
    UnknownBlockchain(String),

    #[error("Indexer unavailable: {0}")]
    Unavailable(String),

    #[error("Request timed out")]
    Timeout,
}

impl IndexerError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            IndexerError::HttpError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            IndexerError::Status { status, .. } => *status >= 500 || *status == 429,
            IndexerError::Unavailable(_) | IndexerError::Timeout => true,
            _ => false,
        }
    }
}
