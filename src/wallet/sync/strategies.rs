use crate::indexer::{BlockchainQuery, IndexerError, RawTransaction};
use crate::network::WalletManagerMode;
use crate::wallet::WalletSyncError;
use crate::wallet::sync::events::{SyncEvent, SyncEventHandler};
use crate::wallet::sync::progress_tracker::SyncProgressTracker;

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// What one sync pass should cover
#[derive(Debug, Clone)]
pub struct SyncRequest {
	pub blockchain_id: String,
	pub addresses: Vec<String>,
	pub start_height: u64,
	pub end_height: u64,
}

/// Trait for different synchronization strategies
#[async_trait::async_trait]
pub trait SyncStrategy: Send + Sync {
	/// Execute the sync strategy over `request`
	async fn sync(
		&self,
		request: &SyncRequest,
		handler: &mut dyn SyncEventHandler,
		progress_tracker: &mut SyncProgressTracker,
	) -> Result<(), WalletSyncError>;

	/// Get the name of this strategy
	fn name(&self) -> &'static str;
}

/// Configuration for sync passes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
	/// Blocks below the last synced height to query again, to pick up reorganisations
	pub rescan_depth: u64,
	/// Block range per request when walking the chain
	pub walk_chunk_blocks: u64,
	/// Start another pass this long after one ends; `None` syncs once per connect
	#[serde(with = "crate::config::option_duration_secs")]
	pub resync_interval: Option<Duration>,
	/// Minimum progress increase between two `SyncProgress` events
	pub progress_step_percent: f32,
	/// Timeout for a single query
	#[serde(with = "crate::config::duration_secs")]
	pub request_timeout: Duration,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			rescan_depth: 6,
			walk_chunk_blocks: 2016,
			resync_interval: None,
			progress_step_percent: 10.0,
			request_timeout: Duration::from_secs(60),
		}
	}
}

/// Pick the strategy for a manager running in `mode`.
pub fn strategy_for_mode(
	mode: WalletManagerMode,
	query: Arc<dyn BlockchainQuery>,
	config: &SyncConfig,
) -> Box<dyn SyncStrategy> {
	if mode.syncs_via_api() {
		Box::new(ApiSync::new(query, config.request_timeout))
	} else {
		Box::new(BlockWalkSync::new(
			query,
			config.walk_chunk_blocks,
			config.request_timeout,
		))
	}
}

async fn with_timeout<T>(
	timeout: Duration,
	request: impl Future<Output = Result<T, IndexerError>>,
) -> Result<T, IndexerError> {
	tokio::time::timeout(timeout, request)
		.await
		.map_err(|_| IndexerError::Timeout)?
}

fn latest_timestamp(transactions: &[RawTransaction]) -> Option<u64> {
	transactions.iter().filter_map(|tx| tx.timestamp).max()
}

/// Strategy for fetching the account's transactions in one range query
pub struct ApiSync {
	query: Arc<dyn BlockchainQuery>,
	request_timeout: Duration,
}

impl ApiSync {
	pub fn new(query: Arc<dyn BlockchainQuery>, request_timeout: Duration) -> Self {
		Self {
			query,
			request_timeout,
		}
	}
}

#[async_trait::async_trait]
impl SyncStrategy for ApiSync {
	async fn sync(
		&self,
		request: &SyncRequest,
		handler: &mut dyn SyncEventHandler,
		progress_tracker: &mut SyncProgressTracker,
	) -> Result<(), WalletSyncError> {
		info!(
			"Starting API sync of {} from block {} to {}",
			request.blockchain_id, request.start_height, request.end_height
		);

		let transactions = with_timeout(
			self.request_timeout,
			self.query.get_raw_transactions(
				&request.blockchain_id,
				&request.addresses,
				request.start_height,
				request.end_height,
			),
		)
		.await?;
		debug!("Received {} transactions", transactions.len());

		progress_tracker.record_transactions(transactions.len());
		progress_tracker.record_processed(request.end_height);
		let timestamp = latest_timestamp(&transactions);

		handler
			.handle(SyncEvent::TransactionsReceived {
				start_height: request.start_height,
				end_height: request.end_height,
				transactions,
			})
			.await?;

		if let Some(percent_complete) = progress_tracker.take_progress_report() {
			handler
				.handle(SyncEvent::ProgressUpdate {
					height: request.end_height,
					timestamp,
					percent_complete,
				})
				.await?;
		}

		progress_tracker
			.validate_completion()
			.map_err(WalletSyncError::SyncError)?;

		let stats = progress_tracker.get_stats();
		info!("API sync completed: {}", stats.summary());

		handler
			.handle(SyncEvent::SyncCompleted {
				final_height: stats.highest_processed_height,
				transactions_processed: stats.transactions_processed,
			})
			.await
	}

	fn name(&self) -> &'static str {
		"ApiSync"
	}
}

/// Strategy for walking the chain in fixed-size block ranges
pub struct BlockWalkSync {
	query: Arc<dyn BlockchainQuery>,
	chunk_blocks: u64,
	request_timeout: Duration,
}

impl BlockWalkSync {
	pub fn new(query: Arc<dyn BlockchainQuery>, chunk_blocks: u64, request_timeout: Duration) -> Self {
		Self {
			query,
			chunk_blocks: chunk_blocks.max(1),
			request_timeout,
		}
	}
}

#[async_trait::async_trait]
impl SyncStrategy for BlockWalkSync {
	async fn sync(
		&self,
		request: &SyncRequest,
		handler: &mut dyn SyncEventHandler,
		progress_tracker: &mut SyncProgressTracker,
	) -> Result<(), WalletSyncError> {
		info!(
			"Starting block walk of {} from block {} to {} in chunks of {}",
			request.blockchain_id, request.start_height, request.end_height, self.chunk_blocks
		);

		let mut from = request.start_height;
		loop {
			let to = from
				.saturating_add(self.chunk_blocks - 1)
				.min(request.end_height);

			let transactions = with_timeout(
				self.request_timeout,
				self.query.get_raw_transactions(
					&request.blockchain_id,
					&request.addresses,
					from,
					to,
				),
			)
			.await?;
			debug!(
				"Blocks {}..={}: {} transactions",
				from,
				to,
				transactions.len()
			);

			progress_tracker.record_transactions(transactions.len());
			progress_tracker.record_processed(to);
			let timestamp = latest_timestamp(&transactions);

			if !transactions.is_empty() {
				handler
					.handle(SyncEvent::TransactionsReceived {
						start_height: from,
						end_height: to,
						transactions,
					})
					.await?;
			}

			if let Some(percent_complete) = progress_tracker.take_progress_report() {
				progress_tracker.log_progress();
				handler
					.handle(SyncEvent::ProgressUpdate {
						height: to,
						timestamp,
						percent_complete,
					})
					.await?;
			}

			if to >= request.end_height {
				break;
			}
			from = to + 1;
		}

		progress_tracker
			.validate_completion()
			.map_err(WalletSyncError::SyncError)?;

		let stats = progress_tracker.get_stats();
		info!("Block walk completed: {}", stats.summary());

		handler
			.handle(SyncEvent::SyncCompleted {
				final_height: stats.highest_processed_height,
				transactions_processed: stats.transactions_processed,
			})
			.await
	}

	fn name(&self) -> &'static str {
		"BlockWalkSync"
	}
}
