//! State persistence service for wallet managers.
//!
//! Each network gets its own store directory under the system path. The store holds the known
//! transfers, the block headers and peers imported from a legacy store, and the height the
//! transfers have been synced to. Wallet managers load transfers from the store on creation and
//! write through to it as sync discovers or updates transfers; migration fills it in one
//! all-or-nothing import.

use crate::network::Network;
use crate::wallet::WalletSyncError;
use crate::wallet::sync::repositories::{
    BlockRecord, FileRecordRepository, FileSyncStateRepository, PeerRecord, RecordRepository,
    SyncStateRepository, TransferRecord,
};

use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Service for managing one network's persisted state.
pub struct StatePersistenceService {
    data_dir: PathBuf,
    transfer_repo: Box<dyn RecordRepository<TransferRecord>>,
    block_repo: Box<dyn RecordRepository<BlockRecord>>,
    peer_repo: Box<dyn RecordRepository<PeerRecord>>,
    sync_state_repo: Box<dyn SyncStateRepository>,
    write_lock: Mutex<()>,
}

impl StatePersistenceService {
    /// Store for `network` under the system storage root.
    pub fn new(root: &Path, network: &Network) -> Self {
        Self::for_dir(root.join(network.uids()))
    }

    pub fn for_dir(data_dir: PathBuf) -> Self {
        Self {
            transfer_repo: Box::new(FileRecordRepository::new(&data_dir, "transfers.bin")),
            block_repo: Box::new(FileRecordRepository::new(&data_dir, "blocks.bin")),
            peer_repo: Box::new(FileRecordRepository::new(&data_dir, "peers.bin")),
            sync_state_repo: Box::new(FileSyncStateRepository::new(data_dir.clone())),
            data_dir,
            write_lock: Mutex::new(()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    async fn ensure_dir(&self) -> Result<(), WalletSyncError> {
        tokio::fs::create_dir_all(&self.data_dir).await.map_err(|e| {
            WalletSyncError::StorageError(format!(
                "Failed to create store directory {:?}: {}",
                self.data_dir, e
            ))
        })
    }

    pub async fn load_transfers(&self) -> Result<Vec<TransferRecord>, WalletSyncError> {
        self.transfer_repo.load_all().await
    }

    pub async fn load_blocks(&self) -> Result<Vec<BlockRecord>, WalletSyncError> {
        self.block_repo.load_all().await
    }

    pub async fn load_peers(&self) -> Result<Vec<PeerRecord>, WalletSyncError> {
        self.peer_repo.load_all().await
    }

    /// Insert or replace transfers, keyed by hash.
    pub async fn upsert_transfers(&self, records: &[TransferRecord]) -> Result<(), WalletSyncError> {
        let _guard = self.write_lock.lock().await;
        self.ensure_dir().await?;

        let mut stored = self.transfer_repo.load_all().await?;
        for record in records {
            match stored.iter().position(|existing| existing.hash == record.hash) {
                Some(index) => stored[index] = record.clone(),
                None => stored.push(record.clone()),
            }
        }
        self.transfer_repo.save_all(&stored).await
    }

    pub async fn save_sync_height(&self, height: u64) -> Result<(), WalletSyncError> {
        let _guard = self.write_lock.lock().await;
        self.ensure_dir().await?;
        self.sync_state_repo.save(height).await
    }

    pub async fn load_sync_height(&self) -> Result<Option<u64>, WalletSyncError> {
        self.sync_state_repo.load().await
    }

    /// Whether anything has been written to this store.
    pub async fn has_data(&self) -> Result<bool, WalletSyncError> {
        Ok(!self.transfer_repo.load_all().await?.is_empty()
            || !self.block_repo.load_all().await?.is_empty()
            || !self.peer_repo.load_all().await?.is_empty())
    }

    /// Replace the store contents with the given records, all or nothing.
    ///
    /// Every list is first staged next to its live file; only when all staging writes succeed
    /// are the staged files moved into place. On failure the previous contents are restored
    /// as far as the filesystem allows and the error is returned.
    pub async fn import(
        &self,
        transfers: &[TransferRecord],
        blocks: &[BlockRecord],
        peers: &[PeerRecord],
    ) -> Result<(), WalletSyncError> {
        let _guard = self.write_lock.lock().await;
        self.ensure_dir().await?;

        let staged = async {
            self.transfer_repo.stage(transfers).await?;
            self.block_repo.stage(blocks).await?;
            self.peer_repo.stage(peers).await
        }
        .await;
        if let Err(e) = staged {
            self.discard_staged().await;
            return Err(e);
        }

        let previous = (
            self.transfer_repo.load_all().await?,
            self.block_repo.load_all().await?,
            self.peer_repo.load_all().await?,
        );

        let committed = async {
            self.transfer_repo.commit_staged().await?;
            self.block_repo.commit_staged().await?;
            self.peer_repo.commit_staged().await
        }
        .await;
        if let Err(e) = committed {
            warn!("Import into {:?} failed, restoring previous state: {}", self.data_dir, e);
            self.discard_staged().await;
            if let Err(restore) = self.restore(&previous.0, &previous.1, &previous.2).await {
                warn!("Failed to restore {:?}: {}", self.data_dir, restore);
            }
            return Err(e);
        }

        info!(
            "Imported {} transfers, {} blocks and {} peers into {:?}",
            transfers.len(),
            blocks.len(),
            peers.len(),
            self.data_dir
        );
        Ok(())
    }

    async fn discard_staged(&self) {
        self.transfer_repo.discard_staged().await;
        self.block_repo.discard_staged().await;
        self.peer_repo.discard_staged().await;
    }

    async fn restore(
        &self,
        transfers: &[TransferRecord],
        blocks: &[BlockRecord],
        peers: &[PeerRecord],
    ) -> Result<(), WalletSyncError> {
        if transfers.is_empty() {
            self.transfer_repo.clear().await?;
        } else {
            self.transfer_repo.save_all(transfers).await?;
        }
        if blocks.is_empty() {
            self.block_repo.clear().await?;
        } else {
            self.block_repo.save_all(blocks).await?;
        }
        if peers.is_empty() {
            self.peer_repo.clear().await?;
        } else {
            self.peer_repo.save_all(peers).await?;
        }
        Ok(())
    }
}
