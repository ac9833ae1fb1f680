//! Wallet Synchronization Module
//!
//! Everything a wallet manager needs to bring its wallets up to date with a network:
//!
//! - `orchestrator`: runs one sync pass for a manager session and applies what it finds.
//! - `events`: internal events strategies report back to the orchestrator.
//! - `progress_tracker`: completion percentage and statistics for a pass.
//! - `strategies`: range query over the indexer API, or a chunked walk of the chain.
//! - `transaction_processor`: parses raw transactions and computes their hashes.
//! - `repositories` and `state_persistence`: the per-network store.

/// Internal events between strategies and the orchestrator
pub mod events;
/// Coordinator for one sync pass
pub mod orchestrator;
/// Tracks synchronization progress and statistics
pub mod progress_tracker;
/// File-backed record stores
pub mod repositories;
/// Per-network store facade
pub mod state_persistence;
/// Pluggable synchronization strategies
pub mod strategies;
/// Transaction parsing and validation service
pub mod transaction_processor;

pub use orchestrator::WalletSyncOrchestrator;
pub use progress_tracker::SyncStats;
pub use repositories::{BlockRecord, PeerRecord, TransferRecord};
pub use state_persistence::StatePersistenceService;
pub use strategies::SyncConfig;
