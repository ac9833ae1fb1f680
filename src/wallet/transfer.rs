//! Transfers: single value movements owned by a wallet.

use crate::indexer::TransactionStatus;
use crate::network::TransactionFormat;
use crate::wallet::types::WalletId;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Content hash identifying a finalized transfer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransferHash(pub [u8; 32]);

impl TransferHash {
	pub fn from_hex(value: &str) -> Option<Self> {
		let bytes = hex::decode(value).ok()?;
		let array: [u8; 32] = bytes.try_into().ok()?;
		Some(Self(array))
	}

	pub fn as_bytes(&self) -> &[u8; 32] {
		&self.0
	}
}

impl fmt::Display for TransferHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&hex::encode(self.0))
	}
}

impl fmt::Debug for TransferHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "TransferHash({})", self)
	}
}

/// Lifecycle state of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferState {
	/// Known but not yet in a block
	Created,
	/// In a block
	Included { block_height: u64, timestamp: u64 },
	/// Rejected by the network; terminal
	Failed { reason: String },
}

impl TransferState {
	/// State implied by an indexer status and the reported block position.
	pub fn from_status(
		status: TransactionStatus,
		block_height: Option<u64>,
		timestamp: Option<u64>,
	) -> Self {
		match (status, block_height) {
			(TransactionStatus::Failed, _) => TransferState::Failed {
				reason: "rejected by network".to_string(),
			},
			(TransactionStatus::Confirmed, Some(block_height)) => TransferState::Included {
				block_height,
				timestamp: timestamp.unwrap_or_default(),
			},
			_ => TransferState::Created,
		}
	}

	pub fn is_included(&self) -> bool {
		matches!(self, TransferState::Included { .. })
	}

	pub fn is_terminal(&self) -> bool {
		matches!(self, TransferState::Failed { .. })
	}

	pub fn block_height(&self) -> Option<u64> {
		match self {
			TransferState::Included { block_height, .. } => Some(*block_height),
			_ => None,
		}
	}
}

impl fmt::Display for TransferState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TransferState::Created => f.write_str("created"),
			TransferState::Included { block_height, .. } => {
				write!(f, "included@{}", block_height)
			}
			TransferState::Failed { reason } => write!(f, "failed ({})", reason),
		}
	}
}

/// A single value movement. Instances handed to listeners are snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
	wallet: WalletId,
	hash: Option<TransferHash>,
	state: TransferState,
	format: TransactionFormat,
	raw: Vec<u8>,
}

impl Transfer {
	pub(crate) fn new(
		wallet: WalletId,
		hash: TransferHash,
		state: TransferState,
		format: TransactionFormat,
		raw: Vec<u8>,
	) -> Self {
		Self {
			wallet,
			hash: Some(hash),
			state,
			format,
			raw,
		}
	}

	/// The owning wallet.
	pub fn wallet(&self) -> WalletId {
		self.wallet
	}

	pub fn hash(&self) -> Option<TransferHash> {
		self.hash
	}

	pub fn state(&self) -> &TransferState {
		&self.state
	}

	/// Serialized transaction in its network's format.
	pub fn raw(&self) -> &[u8] {
		&self.raw
	}

	pub fn format(&self) -> TransactionFormat {
		self.format
	}

	pub(crate) fn set_state(&mut self, state: TransferState) -> TransferState {
		std::mem::replace(&mut self.state, state)
	}
}
