//! Blockchain query integration
//!
//! This module defines the query collaborator wallet managers sync through, and provides an
//! HTTP client for Blockset-style indexers plus an in-memory chain used by the demo and tests.
//! The sync engine only depends on the `BlockchainQuery` trait.

/// HTTP client for Blockset-style indexers
mod client;
/// In-memory chain for demos and tests
mod memory;
/// Type definitions for indexer data structures
mod types;

pub use client::BlocksetClient;
pub use memory::MemoryBlockchain;
pub use types::*;

/// Opaque request/response access to a network's chain data.
#[async_trait::async_trait]
pub trait BlockchainQuery: Send + Sync {
    /// Current block height of the given blockchain.
    async fn get_block_height(&self, blockchain_id: &str) -> Result<u64, IndexerError>;

    /// Every transaction touching `addresses` in the inclusive block range, plus pending
    /// transactions when the range reaches the chain tip.
    async fn get_raw_transactions(
        &self,
        blockchain_id: &str,
        addresses: &[String],
        start_block_height: u64,
        end_block_height: u64,
    ) -> Result<Vec<RawTransaction>, IndexerError>;
}
