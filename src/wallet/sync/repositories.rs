use crate::wallet::{TransferHash, TransferState, WalletSyncError};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A transfer as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
	pub hash: TransferHash,
	pub currency_uids: String,
	pub state: TransferState,
	pub raw: Vec<u8>,
}

/// A block header as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
	pub hash: [u8; 32],
	pub height: u32,
	pub header: Vec<u8>,
}

/// A known peer as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
	pub address: Ipv4Addr,
	pub port: u16,
	pub services: u64,
	pub timestamp: u32,
}

/// Repository holding one list of records
#[async_trait::async_trait]
pub trait RecordRepository<T>: Send + Sync {
	async fn save_all(&self, records: &[T]) -> Result<(), WalletSyncError>;
	async fn load_all(&self) -> Result<Vec<T>, WalletSyncError>;
	/// Write `records` beside the live file without replacing it.
	async fn stage(&self, records: &[T]) -> Result<(), WalletSyncError>;
	/// Replace the live file with the staged one.
	async fn commit_staged(&self) -> Result<(), WalletSyncError>;
	async fn discard_staged(&self);
	/// Remove the live file.
	async fn clear(&self) -> Result<(), WalletSyncError>;
}

/// Repository for the height a store has been synced to
#[async_trait::async_trait]
pub trait SyncStateRepository: Send + Sync {
	async fn save(&self, height: u64) -> Result<(), WalletSyncError>;
	async fn load(&self) -> Result<Option<u64>, WalletSyncError>;
}

/// File-based implementation of RecordRepository, one bincode file per list
pub struct FileRecordRepository<T> {
	path: PathBuf,
	_records: PhantomData<fn() -> T>,
}

impl<T> FileRecordRepository<T> {
	pub fn new(data_dir: &Path, file_name: &str) -> Self {
		Self {
			path: data_dir.join(file_name),
			_records: PhantomData,
		}
	}

	fn staged_path(&self) -> PathBuf {
		let mut name = self.path.clone().into_os_string();
		name.push(".staged");
		PathBuf::from(name)
	}
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), WalletSyncError> {
	let mut tmp = path.to_path_buf().into_os_string();
	tmp.push(".tmp");
	let tmp = PathBuf::from(tmp);

	tokio::fs::write(&tmp, bytes).await.map_err(|e| {
		WalletSyncError::StorageError(format!("Failed to write {:?}: {}", tmp, e))
	})?;
	tokio::fs::rename(&tmp, path).await.map_err(|e| {
		WalletSyncError::StorageError(format!("Failed to replace {:?}: {}", path, e))
	})
}

#[async_trait::async_trait]
impl<T> RecordRepository<T> for FileRecordRepository<T>
where
	T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
	async fn save_all(&self, records: &[T]) -> Result<(), WalletSyncError> {
		let bytes = bincode::serialize(records)?;
		write_atomically(&self.path, &bytes).await?;
		debug!("Saved {} records to {:?}", records.len(), self.path);
		Ok(())
	}

	async fn load_all(&self) -> Result<Vec<T>, WalletSyncError> {
		if !tokio::fs::try_exists(&self.path).await? {
			return Ok(Vec::new());
		}

		let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
			WalletSyncError::StorageError(format!("Failed to read {:?}: {}", self.path, e))
		})?;
		let records: Vec<T> = bincode::deserialize(&bytes)?;
		debug!("Loaded {} records from {:?}", records.len(), self.path);
		Ok(records)
	}

	async fn stage(&self, records: &[T]) -> Result<(), WalletSyncError> {
		let bytes = bincode::serialize(records)?;
		write_atomically(&self.staged_path(), &bytes).await
	}

	async fn commit_staged(&self) -> Result<(), WalletSyncError> {
		let staged = self.staged_path();
		tokio::fs::rename(&staged, &self.path).await.map_err(|e| {
			WalletSyncError::StorageError(format!("Failed to commit {:?}: {}", staged, e))
		})
	}

	async fn discard_staged(&self) {
		let staged = self.staged_path();
		if let Err(e) = tokio::fs::remove_file(&staged).await {
			if e.kind() != std::io::ErrorKind::NotFound {
				warn!("Failed to remove staged file {:?}: {}", staged, e);
			}
		}
	}

	async fn clear(&self) -> Result<(), WalletSyncError> {
		match tokio::fs::remove_file(&self.path).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}
}

/// File-based implementation of SyncStateRepository
pub struct FileSyncStateRepository {
	data_dir: PathBuf,
}

impl FileSyncStateRepository {
	pub fn new(data_dir: PathBuf) -> Self {
		Self { data_dir }
	}

	fn metadata_filename(&self) -> PathBuf {
		self.data_dir.join("sync_state.meta.json")
	}
}

#[async_trait::async_trait]
impl SyncStateRepository for FileSyncStateRepository {
	async fn save(&self, height: u64) -> Result<(), WalletSyncError> {
		let metadata = serde_json::json!({
			"sync_height": height,
			"timestamp": chrono::Utc::now().to_rfc3339(),
		});

		let metadata_filename = self.metadata_filename();
		write_atomically(&metadata_filename, serde_json::to_string_pretty(&metadata)?.as_bytes())
			.await?;

		info!("Saved sync state to {:?} at height {}", metadata_filename, height);
		Ok(())
	}

	async fn load(&self) -> Result<Option<u64>, WalletSyncError> {
		let metadata_filename = self.metadata_filename();

		let meta_content = match tokio::fs::read_to_string(&metadata_filename).await {
			Ok(content) => content,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(e.into()),
		};

		// An unreadable metadata file only costs a full rescan
		let height = serde_json::from_str::<serde_json::Value>(&meta_content)
			.ok()
			.and_then(|metadata| metadata.get("sync_height").and_then(|h| h.as_u64()));
		if height.is_none() {
			warn!("Ignoring malformed sync state in {:?}", metadata_filename);
		}
		Ok(height)
	}
}
