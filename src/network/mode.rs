//! Wallet manager sync modes.
//!
//! A mode has two representations: a single-byte serialization code used for persistence and
//! interchange, and a native code consumed by the sync layer. Both decode to `None` for any
//! value outside the valid set; there is no fallback mode.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Policy selecting how a manager talks to its network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletManagerMode {
	/// Sync and submit through the indexer API only
	ApiOnly,
	/// Sync through the API, submit through peers
	ApiWithP2pSubmit,
	/// Peer-to-peer operation with an API-driven initial sync
	P2pWithApiSync,
	/// Peer-to-peer only
	P2pOnly,
}

const SERIALIZATION_BASE: u8 = 0xf0;

impl WalletManagerMode {
	pub const ALL: [WalletManagerMode; 4] = [
		WalletManagerMode::ApiOnly,
		WalletManagerMode::ApiWithP2pSubmit,
		WalletManagerMode::P2pWithApiSync,
		WalletManagerMode::P2pOnly,
	];

	/// Single-byte persistence code.
	pub fn serialization(self) -> u8 {
		SERIALIZATION_BASE + self.core() as u8
	}

	pub fn from_serialization(code: u8) -> Option<Self> {
		code.checked_sub(SERIALIZATION_BASE)
			.and_then(|native| Self::from_core(native as u32))
	}

	/// Native code used by the sync layer.
	pub fn core(self) -> u32 {
		match self {
			WalletManagerMode::ApiOnly => 0,
			WalletManagerMode::ApiWithP2pSubmit => 1,
			WalletManagerMode::P2pWithApiSync => 2,
			WalletManagerMode::P2pOnly => 3,
		}
	}

	pub fn from_core(code: u32) -> Option<Self> {
		match code {
			0 => Some(WalletManagerMode::ApiOnly),
			1 => Some(WalletManagerMode::ApiWithP2pSubmit),
			2 => Some(WalletManagerMode::P2pWithApiSync),
			3 => Some(WalletManagerMode::P2pOnly),
			_ => None,
		}
	}

	/// Whether history is fetched through the indexer API rather than walked block by block.
	pub fn syncs_via_api(self) -> bool {
		!matches!(self, WalletManagerMode::P2pOnly)
	}
}

impl fmt::Display for WalletManagerMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			WalletManagerMode::ApiOnly => "api_only",
			WalletManagerMode::ApiWithP2pSubmit => "api_with_p2p_submit",
			WalletManagerMode::P2pWithApiSync => "p2p_with_api_sync",
			WalletManagerMode::P2pOnly => "p2p_only",
		};
		f.write_str(name)
	}
}
