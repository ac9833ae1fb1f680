use crate::indexer::IndexerError;
use crate::migration::MigrationError;
use crate::network::{AddressScheme, WalletManagerMode};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a `System` instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SystemId(pub u64);

/// Identifies a wallet manager within its system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ManagerId(pub u32);

/// Identifies a wallet within its manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WalletId {
	pub manager: ManagerId,
	pub index: u32,
}

impl fmt::Display for ManagerId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "manager-{}", self.0)
	}
}

impl fmt::Display for WalletId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/wallet-{}", self.manager, self.index)
	}
}

/// Connection lifecycle of a wallet manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WalletManagerState {
	Created,
	Connected,
	Syncing,
	Disconnected,
}

impl fmt::Display for WalletManagerState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			WalletManagerState::Created => "created",
			WalletManagerState::Connected => "connected",
			WalletManagerState::Syncing => "syncing",
			WalletManagerState::Disconnected => "disconnected",
		};
		f.write_str(name)
	}
}

/// Why a sync attempt ended without completing. Carried by `SyncEnded` events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncFailure {
	/// The manager was disconnected while the sync was running
	Cancelled,
	/// The network could not be reached
	Unreachable(String),
	/// A request timed out
	Timeout,
	/// Any other failure
	Failed(String),
}

impl fmt::Display for SyncFailure {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncFailure::Cancelled => f.write_str("sync cancelled"),
			SyncFailure::Unreachable(reason) => write!(f, "network unreachable: {}", reason),
			SyncFailure::Timeout => f.write_str("request timed out"),
			SyncFailure::Failed(reason) => write!(f, "sync failed: {}", reason),
		}
	}
}

impl From<&WalletSyncError> for SyncFailure {
	fn from(error: &WalletSyncError) -> Self {
		match error {
			WalletSyncError::Cancelled => SyncFailure::Cancelled,
			WalletSyncError::IndexerError(IndexerError::Timeout) => SyncFailure::Timeout,
			WalletSyncError::IndexerError(IndexerError::HttpError(e)) if e.is_timeout() => {
				SyncFailure::Timeout
			}
			WalletSyncError::IndexerError(e) if e.is_transient() => {
				SyncFailure::Unreachable(e.to_string())
			}
			other => SyncFailure::Failed(other.to_string()),
		}
	}
}

/// Error types for wallet managers and the system that owns them
#[derive(Debug, thiserror::Error)]
pub enum WalletSyncError {
	#[error("Indexer error: {0}")]
	IndexerError(#[from] IndexerError),

	#[error("Migration error: {0}")]
	MigrationError(#[from] MigrationError),

	#[error("Cannot {operation} a manager in state {state}")]
	InvalidTransition {
		operation: &'static str,
		state: WalletManagerState,
	},

	#[error("Mode {mode} is not supported on {network}")]
	UnsupportedMode {
		network: String,
		mode: WalletManagerMode,
	},

	#[error("Address scheme {scheme:?} is not supported on {network}")]
	UnsupportedAddressScheme {
		network: String,
		scheme: AddressScheme,
	},

	#[error("A wallet manager already exists for {0}")]
	ManagerExists(String),

	#[error("Unknown network: {0}")]
	UnknownNetwork(String),

	#[error("Transaction parse error: {0}")]
	ParseError(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),

	#[error("Storage encoding error: {0}")]
	EncodingError(#[from] bincode::Error),

	#[error("JSON error: {0}")]
	JsonError(#[from] serde_json::Error),

	#[error("Storage error: {0}")]
	StorageError(String),

	#[error("Sync error: {0}")]
	SyncError(String),

	#[error("Sync cancelled")]
	Cancelled,

	#[error("No async runtime: {0}")]
	RuntimeError(#[from] tokio::runtime::TryCurrentError),
}
