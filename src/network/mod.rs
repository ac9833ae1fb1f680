//! Network descriptions
//!
//! A `Network` identifies one blockchain and the capabilities a wallet manager may use on it:
//! currencies, fee tiers, address schemes, sync modes and the storage format of its persisted
//! history. Networks are discovered once per system and never mutated afterwards.

/// Sync mode policy and its codes
pub mod mode;

pub use mode::WalletManagerMode;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Blockchain family a network belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkFamily {
	Bitcoin,
	BitcoinCash,
	Ethereum,
}

impl NetworkFamily {
	/// Raw transaction format used by every network of this family.
	pub fn transaction_format(self) -> TransactionFormat {
		match self {
			NetworkFamily::Bitcoin | NetworkFamily::BitcoinCash => TransactionFormat::Bitcoin,
			NetworkFamily::Ethereum => TransactionFormat::Opaque,
		}
	}
}

/// Serialized transaction format; also the tag carried by migration blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionFormat {
	/// Bitcoin consensus encoding
	Bitcoin,
	/// Bytes without a parseable structure; identity is the SHA-256 of the payload
	Opaque,
}

impl fmt::Display for TransactionFormat {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TransactionFormat::Bitcoin => f.write_str("bitcoin-family"),
			TransactionFormat::Opaque => f.write_str("opaque"),
		}
	}
}

/// Layout of a network's persisted history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageFormat {
	/// History written by a previous client generation; must be migrated before first use
	BitcoinLegacy,
	/// Current format, nothing to migrate
	Native,
}

impl StorageFormat {
	pub fn requires_migration(self) -> bool {
		matches!(self, StorageFormat::BitcoinLegacy)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrencyKind {
	Native,
	Erc20 { issuer: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency {
	pub uids: String,
	pub code: String,
	pub name: String,
	pub kind: CurrencyKind,
}

impl Currency {
	pub fn native(uids: &str, code: &str, name: &str) -> Self {
		Self {
			uids: uids.to_string(),
			code: code.to_string(),
			name: name.to_string(),
			kind: CurrencyKind::Native,
		}
	}

	pub fn erc20(uids: &str, code: &str, name: &str, issuer: &str) -> Self {
		Self {
			uids: uids.to_string(),
			code: code.to_string(),
			name: name.to_string(),
			kind: CurrencyKind::Erc20 {
				issuer: issuer.to_string(),
			},
		}
	}
}

/// A fee tier offered by a network. The price is opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkFee {
	pub tier: String,
	pub confirmation_time: Duration,
	pub price_per_cost_factor: u64,
}

impl NetworkFee {
	fn new(tier: &str, confirmation_time: Duration, price_per_cost_factor: u64) -> Self {
		Self {
			tier: tier.to_string(),
			confirmation_time,
			price_per_cost_factor,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressScheme {
	BtcLegacy,
	BtcSegwit,
	EthDefault,
	GenDefault,
}

/// An immutable blockchain description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
	uids: String,
	name: String,
	family: NetworkFamily,
	is_mainnet: bool,
	height: u64,
	currency: Currency,
	currencies: Vec<Currency>,
	fees: Vec<NetworkFee>,
	address_schemes: Vec<AddressScheme>,
	default_address_scheme: AddressScheme,
	modes: Vec<WalletManagerMode>,
	default_mode: WalletManagerMode,
	storage_format: StorageFormat,
	confirmations_until_final: u32,
}

impl Network {
	pub fn uids(&self) -> &str {
		&self.uids
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn family(&self) -> NetworkFamily {
		self.family
	}

	pub fn is_mainnet(&self) -> bool {
		self.is_mainnet
	}

	/// Block height observed at discovery.
	pub fn height(&self) -> u64 {
		self.height
	}

	/// The primary currency.
	pub fn currency(&self) -> &Currency {
		&self.currency
	}

	/// Every currency with wallets on this network, primary first.
	pub fn currencies(&self) -> &[Currency] {
		&self.currencies
	}

	pub fn currency_by_code(&self, code: &str) -> Option<&Currency> {
		self.currencies
			.iter()
			.find(|currency| currency.code.eq_ignore_ascii_case(code))
	}

	pub fn fees(&self) -> &[NetworkFee] {
		&self.fees
	}

	/// The slowest (cheapest) fee tier.
	pub fn default_fee(&self) -> Option<&NetworkFee> {
		self.fees.iter().max_by_key(|fee| fee.confirmation_time)
	}

	pub fn address_schemes(&self) -> &[AddressScheme] {
		&self.address_schemes
	}

	pub fn default_address_scheme(&self) -> AddressScheme {
		self.default_address_scheme
	}

	pub fn modes(&self) -> &[WalletManagerMode] {
		&self.modes
	}

	pub fn default_mode(&self) -> WalletManagerMode {
		self.default_mode
	}

	pub fn storage_format(&self) -> StorageFormat {
		self.storage_format
	}

	pub fn transaction_format(&self) -> TransactionFormat {
		self.family.transaction_format()
	}

	pub fn confirmations_until_final(&self) -> u32 {
		self.confirmations_until_final
	}

	/// Copy of this network carrying the height observed at discovery.
	pub fn with_height(mut self, height: u64) -> Self {
		self.height = height;
		self
	}
}

impl PartialEq for Network {
	fn eq(&self, other: &Self) -> bool {
		self.uids == other.uids
	}
}

impl Eq for Network {}

impl fmt::Display for Network {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.uids)
	}
}

fn bitcoin_fees() -> Vec<NetworkFee> {
	vec![
		NetworkFee::new("priority", Duration::from_secs(10 * 60), 30_000),
		NetworkFee::new("regular", Duration::from_secs(60 * 60), 10_000),
		NetworkFee::new("economy", Duration::from_secs(6 * 60 * 60), 2_000),
	]
}

fn bitcoin_network(mainnet: bool) -> Network {
	let (uids, name) = if mainnet {
		("bitcoin-mainnet", "Bitcoin")
	} else {
		("bitcoin-testnet", "Bitcoin Testnet")
	};
	let currency = Currency::native(&format!("{uids}:__native__"), "btc", "Bitcoin");
	Network {
		uids: uids.to_string(),
		name: name.to_string(),
		family: NetworkFamily::Bitcoin,
		is_mainnet: mainnet,
		height: 0,
		currencies: vec![currency.clone()],
		currency,
		fees: bitcoin_fees(),
		address_schemes: vec![AddressScheme::BtcSegwit, AddressScheme::BtcLegacy],
		default_address_scheme: AddressScheme::BtcSegwit,
		modes: WalletManagerMode::ALL.to_vec(),
		default_mode: WalletManagerMode::P2pOnly,
		storage_format: StorageFormat::BitcoinLegacy,
		confirmations_until_final: 6,
	}
}

fn bitcoin_cash_network(mainnet: bool) -> Network {
	let (uids, name) = if mainnet {
		("bitcoincash-mainnet", "Bitcoin Cash")
	} else {
		("bitcoincash-testnet", "Bitcoin Cash Testnet")
	};
	let currency = Currency::native(&format!("{uids}:__native__"), "bch", "Bitcoin Cash");
	Network {
		uids: uids.to_string(),
		name: name.to_string(),
		family: NetworkFamily::BitcoinCash,
		is_mainnet: mainnet,
		height: 0,
		currencies: vec![currency.clone()],
		currency,
		fees: vec![NetworkFee::new("regular", Duration::from_secs(60 * 60), 1_000)],
		address_schemes: vec![AddressScheme::BtcLegacy],
		default_address_scheme: AddressScheme::BtcLegacy,
		modes: WalletManagerMode::ALL.to_vec(),
		default_mode: WalletManagerMode::P2pOnly,
		storage_format: StorageFormat::BitcoinLegacy,
		confirmations_until_final: 6,
	}
}

fn ethereum_network(mainnet: bool) -> Network {
	let (uids, name, brd_issuer) = if mainnet {
		(
			"ethereum-mainnet",
			"Ethereum",
			"0x558ec3152e2eb2174905cd19aea4e34a23de9ad6",
		)
	} else {
		(
			"ethereum-ropsten",
			"Ethereum Ropsten",
			"0x7108ca7c4718efa810457f228305c9c71390931a",
		)
	};
	let currency = Currency::native(&format!("{uids}:__native__"), "eth", "Ethereum");
	let brd = Currency::erc20(&format!("{uids}:{brd_issuer}"), "brd", "BRD Token", brd_issuer);
	Network {
		uids: uids.to_string(),
		name: name.to_string(),
		family: NetworkFamily::Ethereum,
		is_mainnet: mainnet,
		height: 0,
		currencies: vec![currency.clone(), brd],
		currency,
		fees: vec![
			NetworkFee::new("priority", Duration::from_secs(60), 20_000_000_000),
			NetworkFee::new("regular", Duration::from_secs(5 * 60), 5_000_000_000),
		],
		address_schemes: vec![AddressScheme::EthDefault],
		default_address_scheme: AddressScheme::EthDefault,
		modes: vec![WalletManagerMode::ApiOnly, WalletManagerMode::P2pOnly],
		default_mode: WalletManagerMode::ApiOnly,
		storage_format: StorageFormat::Native,
		confirmations_until_final: 6,
	}
}

/// Every network this crate knows how to manage.
pub fn builtin_networks() -> Vec<Network> {
	[true, false]
		.into_iter()
		.flat_map(|mainnet| {
			[
				bitcoin_network(mainnet),
				bitcoin_cash_network(mainnet),
				ethereum_network(mainnet),
			]
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn builtin_defaults_are_supported() {
		for network in builtin_networks() {
			assert!(network.modes().contains(&network.default_mode()), "{network}");
			assert!(
				network
					.address_schemes()
					.contains(&network.default_address_scheme()),
				"{network}"
			);
			assert_eq!(network.currency(), &network.currencies()[0]);
			assert!(network.default_fee().is_some());
		}
	}

	#[test]
	fn only_bitcoin_family_requires_migration() {
		for network in builtin_networks() {
			let expected = network.transaction_format() == TransactionFormat::Bitcoin;
			assert_eq!(expected, network.storage_format().requires_migration());
		}
	}

	#[test]
	fn currency_lookup_ignores_case() {
		let eth = ethereum_network(false);
		assert_eq!("brd", eth.currency_by_code("BRD").unwrap().code);
		assert!(eth.currency_by_code("btc").is_none());
	}
}
