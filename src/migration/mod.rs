//! Storage migration from legacy exports.
//!
//! A `Migrator` turns transaction, block and peer blobs into store records for one network. Every
//! blob is validated before anything is written: a blob tagged for another network family, or
//! bytes that do not parse in the network's format, fail the whole migration. Valid input is
//! deduplicated by content hash and imported into the store in a single staged write.

pub mod blob;

pub use blob::{BlockBlob, PeerBlob, TransactionBlob, UNCONFIRMED_HEIGHT};

use crate::network::{Network, TransactionFormat};
use crate::wallet::TransferState;
use crate::wallet::sync::repositories::{BlockRecord, PeerRecord, TransferRecord};
use crate::wallet::sync::state_persistence::StatePersistenceService;
use crate::wallet::sync::transaction_processor::hash_transaction;

use bitcoin::hashes::Hash;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tracing::{debug, info};

/// Error types for storage migration
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("Network {0} does not require migration")]
    NotRequired(String),

    #[error("A wallet manager already exists for {0}")]
    ManagerExists(String),

    #[error("Blob {index} is for {found} networks, expected {expected}")]
    NetworkMismatch {
        index: usize,
        expected: TransactionFormat,
        found: TransactionFormat,
    },

    #[error("Transaction blob {index} is malformed: {reason}")]
    MalformedTransaction { index: usize, reason: String },

    #[error("Block blob {index} is malformed: {reason}")]
    MalformedBlock { index: usize, reason: String },

    #[error("Peer blob {index} is malformed: {reason}")]
    MalformedPeer { index: usize, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Validated, deduplicated records ready to be written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationBatch {
    pub transfers: Vec<TransferRecord>,
    pub blocks: Vec<BlockRecord>,
    pub peers: Vec<PeerRecord>,
}

/// Converts legacy blobs into store records for one network.
pub struct Migrator<'a> {
    network: &'a Network,
}

impl<'a> Migrator<'a> {
    pub fn new(network: &'a Network) -> Self {
        Self { network }
    }

    fn check_format(&self, index: usize, found: TransactionFormat) -> Result<(), MigrationError> {
        let expected = self.network.transaction_format();
        if found != expected {
            return Err(MigrationError::NetworkMismatch {
                index,
                expected,
                found,
            });
        }
        Ok(())
    }

    /// Validate every blob, stopping at the first bad one.
    pub fn validate(
        &self,
        transaction_blobs: &[TransactionBlob],
        block_blobs: &[BlockBlob],
        peer_blobs: &[PeerBlob],
    ) -> Result<MigrationBatch, MigrationError> {
        Ok(MigrationBatch {
            transfers: self.validate_transactions(transaction_blobs)?,
            blocks: self.validate_blocks(block_blobs)?,
            peers: self.validate_peers(peer_blobs)?,
        })
    }

    fn validate_transactions(
        &self,
        blobs: &[TransactionBlob],
    ) -> Result<Vec<TransferRecord>, MigrationError> {
        let currency_uids = &self.network.currency().uids;
        let mut records: Vec<TransferRecord> = Vec::with_capacity(blobs.len());
        let mut by_hash = HashMap::new();

        for (index, blob) in blobs.iter().enumerate() {
            self.check_format(index, blob.format())?;
            let hash = hash_transaction(blob.format(), blob.bytes())
                .map_err(|reason| MigrationError::MalformedTransaction { index, reason })?;

            let state = match blob.inclusion() {
                Some((block_height, timestamp)) => TransferState::Included {
                    block_height: block_height as u64,
                    timestamp: timestamp as u64,
                },
                None => TransferState::Created,
            };

            match by_hash.get(&hash) {
                Some(&position) => {
                    // Same transfer exported twice; keep the confirmed copy
                    let known: &mut TransferRecord = &mut records[position];
                    if !known.state.is_included() && state.is_included() {
                        known.state = state;
                    }
                    debug!("Dropping duplicate transaction blob {} ({})", index, hash);
                }
                None => {
                    by_hash.insert(hash, records.len());
                    records.push(TransferRecord {
                        hash,
                        currency_uids: currency_uids.clone(),
                        state,
                        raw: blob.bytes().to_vec(),
                    });
                }
            }
        }

        Ok(records)
    }

    fn validate_blocks(&self, blobs: &[BlockBlob]) -> Result<Vec<BlockRecord>, MigrationError> {
        let mut records: Vec<BlockRecord> = Vec::with_capacity(blobs.len());

        for (index, blob) in blobs.iter().enumerate() {
            self.check_format(index, blob.format())?;
            let BlockBlob::Btc { block, height } = blob;

            let header: bitcoin::block::Header = bitcoin::consensus::deserialize(block)
                .map_err(|e| MigrationError::MalformedBlock {
                    index,
                    reason: e.to_string(),
                })?;
            let hash = header.block_hash().to_byte_array();

            if records.iter().any(|known| known.hash == hash) {
                debug!("Dropping duplicate block blob {}", index);
                continue;
            }
            records.push(BlockRecord {
                hash,
                height: *height,
                header: block.clone(),
            });
        }

        Ok(records)
    }

    fn validate_peers(&self, blobs: &[PeerBlob]) -> Result<Vec<PeerRecord>, MigrationError> {
        let mut records: Vec<PeerRecord> = Vec::with_capacity(blobs.len());

        for (index, blob) in blobs.iter().enumerate() {
            self.check_format(index, blob.format())?;
            let PeerBlob::Btc {
                address,
                port,
                services,
                timestamp,
            } = blob;

            if *address == 0 {
                return Err(MigrationError::MalformedPeer {
                    index,
                    reason: "unspecified address".to_string(),
                });
            }
            if *port == 0 {
                return Err(MigrationError::MalformedPeer {
                    index,
                    reason: "port 0".to_string(),
                });
            }

            let record = PeerRecord {
                address: Ipv4Addr::from(*address),
                port: *port,
                services: *services,
                timestamp: *timestamp,
            };
            if !records
                .iter()
                .any(|known| known.address == record.address && known.port == record.port)
            {
                records.push(record);
            }
        }

        Ok(records)
    }

    /// Validate the blobs, then write them to `persistence` in one import.
    pub async fn migrate(
        &self,
        persistence: &StatePersistenceService,
        transaction_blobs: &[TransactionBlob],
        block_blobs: &[BlockBlob],
        peer_blobs: &[PeerBlob],
    ) -> Result<MigrationBatch, MigrationError> {
        let batch = self.validate(transaction_blobs, block_blobs, peer_blobs)?;

        persistence
            .import(&batch.transfers, &batch.blocks, &batch.peers)
            .await
            .map_err(|e| MigrationError::Storage(e.to_string()))?;

        info!(
            "Migrated {} transfers, {} blocks and {} peers for {}",
            batch.transfers.len(),
            batch.blocks.len(),
            batch.peers.len(),
            self.network.uids()
        );
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::builtin_networks;
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, TxIn, TxOut, Witness};

    fn network(uids: &str) -> Network {
        builtin_networks()
            .into_iter()
            .find(|network| network.uids() == uids)
            .unwrap()
    }

    fn btc_blob(seed: u8, block_height: u32) -> TransactionBlob {
        let tx = bitcoin::Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::from_bytes(vec![seed]),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(5_000),
                script_pubkey: ScriptBuf::new(),
            }],
        };
        TransactionBlob::Btc {
            bytes: bitcoin::consensus::serialize(&tx),
            block_height,
            timestamp: 1_600_000_000,
        }
    }

    fn header_bytes(nonce: u32) -> Vec<u8> {
        let header = bitcoin::block::Header {
            version: bitcoin::block::Version::ONE,
            prev_blockhash: bitcoin::BlockHash::all_zeros(),
            merkle_root: bitcoin::TxMerkleNode::all_zeros(),
            time: 1_600_000_000,
            bits: bitcoin::CompactTarget::from_consensus(0x1d00ffff),
            nonce,
        };
        bitcoin::consensus::serialize(&header)
    }

    #[test]
    fn duplicates_collapse_to_confirmed_copy() {
        let migrator_network = network("bitcoin-testnet");
        let migrator = Migrator::new(&migrator_network);

        let batch = migrator
            .validate(&[btc_blob(1, UNCONFIRMED_HEIGHT), btc_blob(1, 700), btc_blob(2, 0)], &[], &[])
            .unwrap();

        assert_eq!(2, batch.transfers.len());
        assert_eq!(Some(700), batch.transfers[0].state.block_height());
        assert_eq!(TransferState::Created, batch.transfers[1].state);
    }

    #[test]
    fn one_bad_blob_fails_everything() {
        let migrator_network = network("bitcoin-testnet");
        let migrator = Migrator::new(&migrator_network);
        let bad = TransactionBlob::Btc {
            bytes: vec![0, 1, 2],
            block_height: 10,
            timestamp: 10,
        };

        let result = migrator.validate(&[btc_blob(1, 5), bad, btc_blob(2, 6)], &[], &[]);
        assert!(matches!(
            result,
            Err(MigrationError::MalformedTransaction { index: 1, .. })
        ));
    }

    #[test]
    fn blobs_from_other_families_are_rejected() {
        let eth = network("ethereum-ropsten");
        let result = Migrator::new(&eth).validate(&[btc_blob(1, 5)], &[], &[]);
        assert!(matches!(
            result,
            Err(MigrationError::NetworkMismatch {
                index: 0,
                expected: TransactionFormat::Opaque,
                found: TransactionFormat::Bitcoin,
            })
        ));
    }

    #[test]
    fn blocks_and_peers_are_validated() {
        let btc = network("bitcoin-testnet");
        let migrator = Migrator::new(&btc);

        let blocks = [
            BlockBlob::Btc {
                block: header_bytes(1),
                height: 100,
            },
            BlockBlob::Btc {
                block: header_bytes(1),
                height: 100,
            },
        ];
        let peers = [PeerBlob::Btc {
            address: u32::from(Ipv4Addr::new(127, 0, 0, 1)),
            port: 18333,
            services: 1,
            timestamp: 0,
        }];
        let batch = migrator.validate(&[], &blocks, &peers).unwrap();
        assert_eq!(1, batch.blocks.len());
        assert_eq!(Ipv4Addr::new(127, 0, 0, 1), batch.peers[0].address);

        let short = [BlockBlob::Btc {
            block: vec![0; 79],
            height: 1,
        }];
        assert!(matches!(
            migrator.validate(&[], &short, &[]),
            Err(MigrationError::MalformedBlock { index: 0, .. })
        ));

        let no_port = [PeerBlob::Btc {
            address: 1,
            port: 0,
            services: 0,
            timestamp: 0,
        }];
        assert!(matches!(
            migrator.validate(&[], &[], &no_port),
            Err(MigrationError::MalformedPeer { index: 0, .. })
        ));
    }

    #[tokio::test]
    async fn failed_validation_writes_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let btc = network("bitcoin-testnet");
        let persistence = StatePersistenceService::new(dir.path(), &btc);
        let bad = TransactionBlob::Btc {
            bytes: Vec::new(),
            block_height: 1,
            timestamp: 1,
        };

        let result = Migrator::new(&btc)
            .migrate(&persistence, &[btc_blob(3, 9), bad], &[], &[])
            .await;
        assert!(result.is_err());
        assert!(!persistence.has_data().await.unwrap());

        Migrator::new(&btc)
            .migrate(&persistence, &[btc_blob(3, 9)], &[], &[])
            .await
            .unwrap();
        assert_eq!(1, persistence.load_transfers().await.unwrap().len());
    }
}
