use crate::network::TransactionFormat;

use serde::{Deserialize, Serialize};

/// Block height carried by blobs of transfers that are not in a block yet.
pub const UNCONFIRMED_HEIGHT: u32 = u32::MAX;

/// One historical transfer exported from a legacy store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionBlob {
	/// Consensus-serialized transaction of a Bitcoin-family network
	Btc {
		bytes: Vec<u8>,
		block_height: u32,
		timestamp: u32,
	},
	/// Payload of an account-based network
	Eth {
		bytes: Vec<u8>,
		block_height: u32,
		timestamp: u32,
	},
}

impl TransactionBlob {
	/// Format of the network this blob was exported from.
	pub fn format(&self) -> TransactionFormat {
		match self {
			TransactionBlob::Btc { .. } => TransactionFormat::Bitcoin,
			TransactionBlob::Eth { .. } => TransactionFormat::Opaque,
		}
	}

	pub fn bytes(&self) -> &[u8] {
		match self {
			TransactionBlob::Btc { bytes, .. } | TransactionBlob::Eth { bytes, .. } => bytes,
		}
	}

	/// Block height and timestamp, or `None` when unconfirmed.
	pub fn inclusion(&self) -> Option<(u32, u32)> {
		let (block_height, timestamp) = match self {
			TransactionBlob::Btc {
				block_height,
				timestamp,
				..
			}
			| TransactionBlob::Eth {
				block_height,
				timestamp,
				..
			} => (*block_height, *timestamp),
		};
		match block_height {
			0 | UNCONFIRMED_HEIGHT => None,
			height => Some((height, timestamp)),
		}
	}
}

/// A block header exported from a legacy store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockBlob {
	/// 80-byte consensus block header and its height
	Btc { block: Vec<u8>, height: u32 },
}

impl BlockBlob {
	pub fn format(&self) -> TransactionFormat {
		match self {
			BlockBlob::Btc { .. } => TransactionFormat::Bitcoin,
		}
	}
}

/// A known peer exported from a legacy store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerBlob {
	/// IPv4 address in host order
	Btc {
		address: u32,
		port: u16,
		services: u64,
		timestamp: u32,
	},
}

impl PeerBlob {
	pub fn format(&self) -> TransactionFormat {
		match self {
			PeerBlob::Btc { .. } => TransactionFormat::Bitcoin,
		}
	}
}
