//! Internal events passed from sync strategies to the orchestrator.
//!
//! Strategies only know how to walk a chain through the query collaborator. They report what
//! they find as `SyncEvent`s; the orchestrator's handler turns those into transfers, progress
//! reports and storage writes. Unlike the public event bus, errors returned by the handler abort
//! the strategy, which is how a disconnect stops an in-flight sync.

use crate::indexer::RawTransaction;
use crate::wallet::WalletSyncError;

/// Events that occur during one sync pass
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Transactions found in a block range
    TransactionsReceived {
        start_height: u64,
        end_height: u64,
        transactions: Vec<RawTransaction>,
    },
    /// Progress through the requested range
    ProgressUpdate {
        height: u64,
        timestamp: Option<u64>,
        percent_complete: f32,
    },
    /// The strategy walked the whole range
    SyncCompleted {
        final_height: u64,
        transactions_processed: usize,
    },
}

/// Trait for handling sync events.
#[async_trait::async_trait]
pub trait SyncEventHandler: Send {
    /// Handle a sync event. An error stops the running strategy.
    async fn handle(&mut self, event: SyncEvent) -> Result<(), WalletSyncError>;

    /// Get the name of this handler for logging and diagnostics.
    fn name(&self) -> &'static str;
}
