use crate::indexer::RawTransaction;
use crate::network::{Network, TransactionFormat};
use crate::wallet::sync::repositories::TransferRecord;
use crate::wallet::{TransferHash, TransferState, WalletSyncError};

use bitcoin::hashes::Hash;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Validate `bytes` against `format` and compute the content hash.
pub fn hash_transaction(format: TransactionFormat, bytes: &[u8]) -> Result<TransferHash, String> {
	match format {
		TransactionFormat::Bitcoin => {
			let tx: bitcoin::Transaction =
				bitcoin::consensus::deserialize(bytes).map_err(|e| e.to_string())?;
			Ok(TransferHash(tx.compute_txid().to_byte_array()))
		}
		TransactionFormat::Opaque => {
			if bytes.is_empty() {
				return Err("empty transaction payload".to_string());
			}
			Ok(TransferHash(Sha256::digest(bytes).into()))
		}
	}
}

#[derive(Clone)]
pub struct TransactionProcessor {
	format: TransactionFormat,
	blockchain_id: String,
}

impl TransactionProcessor {
	pub fn new(network: &Network) -> Self {
		Self {
			format: network.transaction_format(),
			blockchain_id: network.uids().to_string(),
		}
	}

	/// Parse raw transaction bytes into the content hash.
	pub fn parse_transaction(&self, bytes: &[u8]) -> Result<TransferHash, WalletSyncError> {
		hash_transaction(self.format, bytes).map_err(|e| {
			WalletSyncError::ParseError(format!(
				"Failed to parse {} transaction on {}: {}",
				self.format, self.blockchain_id, e
			))
		})
	}

	/// Process an indexer transaction into a transfer record
	pub fn process_transaction(
		&self,
		transaction: &RawTransaction,
	) -> Result<TransferRecord, WalletSyncError> {
		let hash = self.parse_transaction(&transaction.data)?;
		let state = TransferState::from_status(
			transaction.status,
			transaction.block_height,
			transaction.timestamp,
		);
		debug!("Processed transaction {} ({})", hash, state);

		Ok(TransferRecord {
			hash,
			currency_uids: transaction.currency_uids.clone(),
			state,
			raw: transaction.data.clone(),
		})
	}

	/// Batch process indexer transactions. Unparseable transactions are logged and skipped so one
	/// bad payload from the network does not stall the wallet.
	pub fn process_transactions_batch(&self, transactions: &[RawTransaction]) -> Vec<TransferRecord> {
		let mut processed = Vec::with_capacity(transactions.len());

		for transaction in transactions {
			match self.process_transaction(transaction) {
				Ok(record) => processed.push(record),
				Err(e) => warn!("Skipping transaction: {}", e),
			}
		}

		processed
	}
}
