pub mod manager;
pub mod sync;
pub mod transfer;
pub mod types;

pub use manager::WalletManager;
pub use transfer::{Transfer, TransferHash, TransferState};
pub use types::*;

use crate::network::Currency;

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Outcome of merging a discovered transfer into a wallet.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TransferChange {
	Added(Transfer),
	Changed {
		transfer: Transfer,
		old_state: TransferState,
	},
	Unchanged,
}

/// Whether a newly observed state should replace the recorded one.
fn supersedes(old: &TransferState, new: &TransferState) -> bool {
	match (old, new) {
		(old, new) if old == new => false,
		(TransferState::Failed { .. }, _) => false,
		(TransferState::Included { .. }, TransferState::Created) => false,
		_ => true,
	}
}

struct WalletInner {
	id: WalletId,
	currency: Currency,
	/// Discovery order, not chain order.
	transfers: RwLock<Vec<Transfer>>,
}

/// The transfers of one currency under one wallet manager.
///
/// Handles are cheap to clone and always read the live transfer list; only the owning manager
/// mutates it.
#[derive(Clone)]
pub struct Wallet {
	inner: Arc<WalletInner>,
}

impl Wallet {
	pub(crate) fn new(id: WalletId, currency: Currency) -> Self {
		Self {
			inner: Arc::new(WalletInner {
				id,
				currency,
				transfers: RwLock::new(Vec::new()),
			}),
		}
	}

	fn read(&self) -> RwLockReadGuard<'_, Vec<Transfer>> {
		self.inner.transfers.read().unwrap_or_else(PoisonError::into_inner)
	}

	fn write(&self) -> RwLockWriteGuard<'_, Vec<Transfer>> {
		self.inner.transfers.write().unwrap_or_else(PoisonError::into_inner)
	}

	pub fn id(&self) -> WalletId {
		self.inner.id
	}

	/// The owning manager.
	pub fn manager(&self) -> ManagerId {
		self.inner.id.manager
	}

	pub fn currency(&self) -> &Currency {
		&self.inner.currency
	}

	pub fn name(&self) -> String {
		self.inner.currency.code.to_uppercase()
	}

	/// Snapshot of every transfer in discovery order.
	pub fn transfers(&self) -> Vec<Transfer> {
		self.read().clone()
	}

	pub fn transfer_count(&self) -> usize {
		self.read().len()
	}

	pub fn transfer_by_hash(&self, hash: &TransferHash) -> Option<Transfer> {
		self.read()
			.iter()
			.find(|transfer| transfer.hash().as_ref() == Some(hash))
			.cloned()
	}

	/// Whether merging a transfer in `state` under `hash` would add or advance it.
	pub(crate) fn would_change(&self, hash: &TransferHash, state: &TransferState) -> bool {
		self.read()
			.iter()
			.find(|known| known.hash().as_ref() == Some(hash))
			.is_none_or(|known| supersedes(known.state(), state))
	}

	/// Add `transfer`, or advance the state of the transfer already recorded under its hash.
	pub(crate) fn merge_transfer(&self, transfer: Transfer) -> TransferChange {
		let mut transfers = self.write();

		let position = transfer.hash().and_then(|hash| {
			transfers
				.iter()
				.position(|known| known.hash() == Some(hash))
		});

		match position {
			Some(index) if supersedes(transfers[index].state(), transfer.state()) => {
				let known = &mut transfers[index];
				let old_state = known.set_state(transfer.state().clone());
				TransferChange::Changed {
					transfer: known.clone(),
					old_state,
				}
			}
			Some(_) => TransferChange::Unchanged,
			None => {
				transfers.push(transfer.clone());
				TransferChange::Added(transfer)
			}
		}
	}
}

impl PartialEq for Wallet {
	fn eq(&self, other: &Self) -> bool {
		self.inner.id == other.inner.id
	}
}

impl Eq for Wallet {}

impl fmt::Debug for Wallet {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Wallet")
			.field("id", &self.inner.id)
			.field("currency", &self.inner.currency.code)
			.field("transfers", &self.transfer_count())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::network::TransactionFormat;

	fn wallet() -> Wallet {
		Wallet::new(
			WalletId {
				manager: ManagerId(1),
				index: 0,
			},
			Currency::native("bitcoin-testnet:__native__", "btc", "Bitcoin"),
		)
	}

	fn transfer(wallet: &Wallet, byte: u8, state: TransferState) -> Transfer {
		Transfer::new(
			wallet.id(),
			TransferHash([byte; 32]),
			state,
			TransactionFormat::Bitcoin,
			vec![byte],
		)
	}

	#[test]
	fn duplicate_hash_is_not_added_twice() {
		let wallet = wallet();
		let first = transfer(&wallet, 1, TransferState::Created);

		assert!(matches!(wallet.merge_transfer(first.clone()), TransferChange::Added(_)));
		assert_eq!(TransferChange::Unchanged, wallet.merge_transfer(first));
		assert_eq!(1, wallet.transfer_count());
	}

	#[test]
	fn inclusion_advances_state_but_never_regresses() {
		let wallet = wallet();
		let included = TransferState::Included {
			block_height: 10,
			timestamp: 100,
		};
		wallet.merge_transfer(transfer(&wallet, 2, TransferState::Created));

		match wallet.merge_transfer(transfer(&wallet, 2, included.clone())) {
			TransferChange::Changed { transfer, old_state } => {
				assert_eq!(TransferState::Created, old_state);
				assert_eq!(&included, transfer.state());
			}
			other => panic!("unexpected change {:?}", other),
		}

		assert_eq!(
			TransferChange::Unchanged,
			wallet.merge_transfer(transfer(&wallet, 2, TransferState::Created))
		);
		assert_eq!(
			Some(&included),
			wallet
				.transfer_by_hash(&TransferHash([2; 32]))
				.as_ref()
				.map(Transfer::state)
		);
	}

	#[test]
	fn would_change_matches_merge_outcome() {
		let wallet = wallet();
		let hash = TransferHash([3; 32]);
		let included = TransferState::Included {
			block_height: 20,
			timestamp: 200,
		};

		assert!(wallet.would_change(&hash, &TransferState::Created));
		wallet.merge_transfer(transfer(&wallet, 3, TransferState::Created));
		assert!(!wallet.would_change(&hash, &TransferState::Created));
		assert!(wallet.would_change(&hash, &included));
		assert_eq!(1, wallet.transfer_count());

		wallet.merge_transfer(transfer(&wallet, 3, included));
		assert!(!wallet.would_change(&hash, &TransferState::Created));
	}
}
