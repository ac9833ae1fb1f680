//! Wallet sync orchestrator.
//!
//! `WalletSyncOrchestrator` runs one sync pass for a wallet manager. It asks the network for the
//! current tip, works out the block range to cover from the persisted sync height, runs the
//! strategy matching the manager's mode, and applies what the strategy reports back through
//! `OrchestratorEventHandler`:
//! - received transactions are parsed into transfer records and merged into the manager's wallets
//! - progress updates become `SyncProgress` events
//! - completion is logged, and the synced height is saved once the whole pass succeeded
//!
//! Every call back into the manager carries the sync session's generation. Once the manager has
//! been disconnected those calls fail with `Cancelled`, which stops the strategy.

use crate::indexer::IndexerError;
use crate::wallet::WalletManager;
use crate::wallet::WalletSyncError;
use crate::wallet::sync::{
    events::{SyncEvent, SyncEventHandler},
    progress_tracker::{SyncProgressTracker, SyncStats},
    strategies::{SyncRequest, SyncStrategy, strategy_for_mode},
    transaction_processor::TransactionProcessor,
};

use tracing::{debug, info};

/// Runs sync passes for one wallet manager session.
pub struct WalletSyncOrchestrator {
    manager: WalletManager,
    generation: u64,
    transaction_processor: TransactionProcessor,
    sync_strategy: Box<dyn SyncStrategy>,
}

impl WalletSyncOrchestrator {
    pub(crate) fn new(manager: WalletManager, generation: u64) -> Self {
        let config = manager.sync_config();
        let sync_strategy = strategy_for_mode(manager.mode(), manager.query(), config);
        Self {
            transaction_processor: TransactionProcessor::new(manager.network()),
            manager,
            generation,
            sync_strategy,
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.sync_strategy.name()
    }

    /// Run one sync pass.
    pub async fn sync(&self) -> Result<SyncStats, WalletSyncError> {
        let network = self.manager.network();
        let config = self.manager.sync_config();
        let persistence = self.manager.persistence();

        let tip = tokio::time::timeout(
            config.request_timeout,
            self.manager.query().get_block_height(network.uids()),
        )
        .await
        .map_err(|_| IndexerError::Timeout)??;
        self.manager.update_height(self.generation, tip)?;

        let start_height = match persistence.load_sync_height().await? {
            Some(synced) => {
                info!("Resuming {} from synced height {}", network.uids(), synced);
                synced.saturating_sub(config.rescan_depth).min(tip)
            }
            None => {
                info!("No synced height for {}, starting from genesis", network.uids());
                0
            }
        };

        let request = SyncRequest {
            blockchain_id: network.uids().to_string(),
            addresses: self.manager.addresses(),
            start_height,
            end_height: tip,
        };
        debug!(
            "Running {} for {} over [{}, {}]",
            self.sync_strategy.name(),
            request.blockchain_id,
            request.start_height,
            request.end_height
        );

        let mut progress_tracker =
            SyncProgressTracker::new(start_height, tip, config.progress_step_percent);
        let mut event_handler = OrchestratorEventHandler {
            manager: self.manager.clone(),
            generation: self.generation,
            transaction_processor: self.transaction_processor.clone(),
            transfers_updated: 0,
        };

        self.sync_strategy
            .sync(&request, &mut event_handler, &mut progress_tracker)
            .await?;
        progress_tracker.record_transfers_updated(event_handler.transfers_updated);

        persistence.save_sync_height(tip).await?;

        let stats = progress_tracker.get_stats();
        info!("Wallet synchronization completed: {}", stats.summary());
        Ok(stats)
    }
}

/// Event handler that feeds strategy output back into the manager.
struct OrchestratorEventHandler {
    manager: WalletManager,
    generation: u64,
    transaction_processor: TransactionProcessor,
    transfers_updated: usize,
}

#[async_trait::async_trait]
impl SyncEventHandler for OrchestratorEventHandler {
    async fn handle(&mut self, event: SyncEvent) -> Result<(), WalletSyncError> {
        match event {
            SyncEvent::TransactionsReceived {
                start_height,
                end_height,
                transactions,
            } => {
                let records = self
                    .transaction_processor
                    .process_transactions_batch(&transactions);
                debug!(
                    "Blocks {}..={}: {} of {} transactions parsed",
                    start_height,
                    end_height,
                    records.len(),
                    transactions.len()
                );

                self.transfers_updated += self
                    .manager
                    .apply_transfers(Some(self.generation), records)
                    .await?;
            }
            SyncEvent::ProgressUpdate {
                timestamp,
                percent_complete,
                ..
            } => {
                self.manager
                    .report_progress(self.generation, timestamp, percent_complete)?;
            }
            SyncEvent::SyncCompleted {
                final_height,
                transactions_processed,
            } => {
                debug!(
                    "Strategy finished at block {} after {} transactions",
                    final_height, transactions_processed
                );
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "OrchestratorEventHandler"
    }
}
