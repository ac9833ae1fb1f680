//! Wallet manager and its connection state machine.
//!
//! A manager owns the wallets of one network and moves through
//! `Created -> Connected -> Syncing -> Connected -> ... -> Disconnected`. All state lives behind
//! one mutex and every event is queued while that mutex is held, so the order handlers observe
//! is the order transitions happened in.
//!
//! Each `connect` opens a session identified by a generation number. Sync passes run on the
//! runtime and only touch the manager while their generation is still the active one; a
//! `disconnect` bumps the generation, cancels the session token and, if a pass was running,
//! emits its `SyncEnded` itself. Whoever clears `active_sync` under the lock emits the single
//! `SyncEnded` for that pass.
//!
//! Transfers found by a pass reach the store before they reach the wallets: a failed or
//! interrupted write leaves the wallets untouched, so the next pass finds the same transfers
//! new again.

use crate::events::{Event, TransferEvent, WalletEvent, WalletManagerEvent};
use crate::events::dispatcher::EventSender;
use crate::indexer::BlockchainQuery;
use crate::network::{AddressScheme, Currency, Network, NetworkFee, WalletManagerMode};
use crate::wallet::sync::repositories::TransferRecord;
use crate::wallet::sync::state_persistence::StatePersistenceService;
use crate::wallet::sync::strategies::SyncConfig;
use crate::wallet::sync::{SyncStats, WalletSyncOrchestrator};
use crate::wallet::{
	ManagerId, SyncFailure, SystemId, Transfer, TransferChange, Wallet, WalletId,
	WalletManagerState, WalletSyncError,
};

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Everything a manager is built from.
pub(crate) struct ManagerParams {
	pub id: ManagerId,
	pub system: SystemId,
	pub network: Arc<Network>,
	pub mode: WalletManagerMode,
	pub address_scheme: AddressScheme,
	pub addresses: Vec<String>,
	pub persistence: Arc<StatePersistenceService>,
	pub query: Arc<dyn BlockchainQuery>,
	pub config: SyncConfig,
	pub events: EventSender,
	pub runtime: Handle,
}

struct ManagerCore {
	state: WalletManagerState,
	height: u64,
	address_scheme: AddressScheme,
	/// Bumped by every connect and disconnect.
	generation: u64,
	/// Generation of the pass between `SyncStarted` and `SyncEnded`, if any.
	active_sync: Option<u64>,
	cancel: Option<CancellationToken>,
}

struct ManagerInner {
	id: ManagerId,
	system: SystemId,
	network: Arc<Network>,
	mode: WalletManagerMode,
	addresses: Vec<String>,
	primary: Wallet,
	/// One wallet per network currency, primary first.
	wallets: Vec<Wallet>,
	persistence: Arc<StatePersistenceService>,
	query: Arc<dyn BlockchainQuery>,
	config: SyncConfig,
	events: EventSender,
	runtime: Handle,
	core: Mutex<ManagerCore>,
}

/// Owns the wallets of one network and drives their synchronization.
#[derive(Clone)]
pub struct WalletManager {
	inner: Arc<ManagerInner>,
}

impl WalletManager {
	pub(crate) fn new(params: ManagerParams) -> Self {
		let mut currencies = params.network.currencies().to_vec();
		if currencies.first() != Some(params.network.currency()) {
			currencies.insert(0, params.network.currency().clone());
		}
		let wallets: Vec<Wallet> = currencies
			.into_iter()
			.enumerate()
			.map(|(index, currency)| {
				Wallet::new(
					WalletId {
						manager: params.id,
						index: index as u32,
					},
					currency,
				)
			})
			.collect();
		let primary = wallets[0].clone();

		let core = ManagerCore {
			state: WalletManagerState::Created,
			height: params.network.height(),
			address_scheme: params.address_scheme,
			generation: 0,
			active_sync: None,
			cancel: None,
		};

		Self {
			inner: Arc::new(ManagerInner {
				id: params.id,
				system: params.system,
				network: params.network,
				mode: params.mode,
				addresses: params.addresses,
				primary,
				wallets,
				persistence: params.persistence,
				query: params.query,
				config: params.config,
				events: params.events,
				runtime: params.runtime,
				core: Mutex::new(core),
			}),
		}
	}

	fn lock(&self) -> MutexGuard<'_, ManagerCore> {
		self.inner.core.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn emit(&self, event: WalletManagerEvent) {
		self.inner.events.emit(Event::Manager {
			manager: self.inner.id,
			event,
		});
	}

	fn emit_wallet(&self, wallet: WalletId, event: WalletEvent) {
		self.inner.events.emit(Event::Wallet { wallet, event });
	}

	fn emit_transfer(&self, transfer: &Transfer, event: TransferEvent) {
		self.inner.events.emit(Event::Transfer {
			wallet: transfer.wallet(),
			transfer: transfer.clone(),
			event,
		});
	}

	fn transition(&self, core: &mut ManagerCore, new_state: WalletManagerState) {
		let old_state = core.state;
		core.state = new_state;
		debug!("{} {}: {} -> {}", self.inner.network.uids(), self.inner.id, old_state, new_state);
		self.emit(WalletManagerEvent::Changed {
			old_state,
			new_state,
		});
	}

	/// Queue the creation events for the manager and every wallet, primary first.
	pub(crate) fn announce_created(&self) {
		let _core = self.lock();
		self.emit(WalletManagerEvent::Created);
		for wallet in &self.inner.wallets {
			self.emit_wallet(wallet.id(), WalletEvent::Created);
			self.emit(WalletManagerEvent::WalletAdded { wallet: wallet.id() });
		}
	}

	pub fn id(&self) -> ManagerId {
		self.inner.id
	}

	/// The owning system.
	pub fn system_id(&self) -> SystemId {
		self.inner.system
	}

	pub fn network(&self) -> &Network {
		&self.inner.network
	}

	pub fn mode(&self) -> WalletManagerMode {
		self.inner.mode
	}

	/// Store directory for this manager's network.
	pub fn path(&self) -> &Path {
		self.inner.persistence.data_dir()
	}

	pub fn state(&self) -> WalletManagerState {
		self.lock().state
	}

	/// Last known block height of the network.
	pub fn height(&self) -> u64 {
		self.lock().height
	}

	/// Connected or syncing.
	pub fn is_active(&self) -> bool {
		matches!(
			self.lock().state,
			WalletManagerState::Connected | WalletManagerState::Syncing
		)
	}

	pub fn address_scheme(&self) -> AddressScheme {
		self.lock().address_scheme
	}

	pub fn set_address_scheme(&self, scheme: AddressScheme) -> Result<(), WalletSyncError> {
		if !self.inner.network.address_schemes().contains(&scheme) {
			return Err(WalletSyncError::UnsupportedAddressScheme {
				network: self.inner.network.uids().to_string(),
				scheme,
			});
		}
		self.lock().address_scheme = scheme;
		Ok(())
	}

	pub fn default_network_fee(&self) -> Option<NetworkFee> {
		self.inner.network.default_fee().cloned()
	}

	pub fn primary_wallet(&self) -> Wallet {
		self.inner.primary.clone()
	}

	pub fn wallets(&self) -> Vec<Wallet> {
		self.inner.wallets.clone()
	}

	pub fn wallet_for_currency(&self, currency: &Currency) -> Option<Wallet> {
		self.wallet_for_uids(&currency.uids)
	}

	fn wallet_for_uids(&self, currency_uids: &str) -> Option<Wallet> {
		self.inner
			.wallets
			.iter()
			.find(|wallet| wallet.currency().uids == currency_uids)
			.cloned()
	}

	pub(crate) fn sync_config(&self) -> &SyncConfig {
		&self.inner.config
	}

	pub(crate) fn query(&self) -> Arc<dyn BlockchainQuery> {
		self.inner.query.clone()
	}

	pub(crate) fn persistence(&self) -> &StatePersistenceService {
		&self.inner.persistence
	}

	pub(crate) fn addresses(&self) -> Vec<String> {
		self.inner.addresses.clone()
	}

	/// Connect and start syncing in the background.
	///
	/// Allowed from `Created` and `Disconnected`. Returns once `Connected` has been entered;
	/// the sync pass and its events follow asynchronously.
	pub fn connect(&self) -> Result<(), WalletSyncError> {
		let (generation, cancel) = {
			let mut core = self.lock();
			match core.state {
				WalletManagerState::Created | WalletManagerState::Disconnected => {}
				state => {
					return Err(WalletSyncError::InvalidTransition {
						operation: "connect",
						state,
					});
				}
			}

			core.generation += 1;
			let cancel = CancellationToken::new();
			core.cancel = Some(cancel.clone());
			self.transition(&mut core, WalletManagerState::Connected);
			(core.generation, cancel)
		};

		info!("Connecting {} ({})", self.inner.network.uids(), self.inner.mode);
		let manager = self.clone();
		self.inner
			.runtime
			.spawn(async move { manager.run_sync_loop(generation, cancel).await });
		Ok(())
	}

	/// Disconnect, cancelling any running sync. A no-op when already disconnected.
	pub fn disconnect(&self) -> Result<(), WalletSyncError> {
		let mut core = self.lock();
		if core.state == WalletManagerState::Disconnected {
			return Ok(());
		}

		core.generation += 1;
		if let Some(cancel) = core.cancel.take() {
			cancel.cancel();
		}
		if core.active_sync.take().is_some() {
			info!("Cancelling sync of {}", self.inner.network.uids());
			self.emit(WalletManagerEvent::SyncEnded {
				error: Some(SyncFailure::Cancelled),
			});
		}
		self.transition(&mut core, WalletManagerState::Disconnected);
		Ok(())
	}

	async fn run_sync_loop(self, generation: u64, cancel: CancellationToken) {
		loop {
			if !self.begin_sync(generation) {
				return;
			}

			let orchestrator = WalletSyncOrchestrator::new(self.clone(), generation);
			debug!("Sync pass of {} using {}", self.inner.network.uids(), orchestrator.strategy_name());
			let outcome = tokio::select! {
				_ = cancel.cancelled() => Err(WalletSyncError::Cancelled),
				result = orchestrator.sync() => result,
			};
			self.end_sync(generation, outcome);

			let Some(interval) = self.inner.config.resync_interval else {
				return;
			};
			tokio::select! {
				_ = cancel.cancelled() => return,
				_ = tokio::time::sleep(interval) => {}
			}
		}
	}

	fn begin_sync(&self, generation: u64) -> bool {
		let mut core = self.lock();
		if core.generation != generation || core.state != WalletManagerState::Connected {
			return false;
		}

		core.active_sync = Some(generation);
		self.emit(WalletManagerEvent::SyncStarted);
		self.transition(&mut core, WalletManagerState::Syncing);
		true
	}

	fn end_sync(&self, generation: u64, outcome: Result<SyncStats, WalletSyncError>) {
		let mut core = self.lock();
		if core.active_sync != Some(generation) {
			debug!("Sync of {} already ended by disconnect", self.inner.network.uids());
			return;
		}
		core.active_sync = None;

		let error = match outcome {
			Ok(stats) => {
				info!("Synced {}: {}", self.inner.network.uids(), stats.summary());
				None
			}
			Err(e) => {
				warn!("Sync of {} failed: {}", self.inner.network.uids(), e);
				Some(SyncFailure::from(&e))
			}
		};
		self.emit(WalletManagerEvent::SyncEnded { error });

		if core.state == WalletManagerState::Syncing {
			self.transition(&mut core, WalletManagerState::Connected);
		}
	}

	fn check_session(&self, core: &ManagerCore, generation: u64) -> Result<(), WalletSyncError> {
		if core.active_sync == Some(generation) {
			Ok(())
		} else {
			Err(WalletSyncError::Cancelled)
		}
	}

	pub(crate) fn update_height(&self, generation: u64, height: u64) -> Result<(), WalletSyncError> {
		let mut core = self.lock();
		self.check_session(&core, generation)?;
		if height > core.height {
			core.height = height;
			self.emit(WalletManagerEvent::BlockUpdated { height });
		}
		Ok(())
	}

	pub(crate) fn report_progress(
		&self,
		generation: u64,
		timestamp: Option<u64>,
		percent_complete: f32,
	) -> Result<(), WalletSyncError> {
		let core = self.lock();
		self.check_session(&core, generation)?;
		self.emit(WalletManagerEvent::SyncProgress {
			timestamp,
			percent_complete,
		});
		Ok(())
	}

	/// Write transfer records to the store on a task of their own, so the write completes even
	/// if the pass that found them is cancelled meanwhile.
	async fn persist_transfers(&self, records: Vec<TransferRecord>) -> Result<(), WalletSyncError> {
		let persistence = self.inner.persistence.clone();
		let write = self
			.inner
			.runtime
			.spawn(async move { persistence.upsert_transfers(&records).await });
		write.await.map_err(|e| {
			WalletSyncError::StorageError(format!("Transfer write task failed: {}", e))
		})?
	}

	/// Merge transfer records into the wallets and announce the changes.
	///
	/// With a session generation the records come from a sync pass: they are rejected once that
	/// session is over, and new or changed transfers are written to the store before any wallet
	/// sees them. Without one they were loaded from the store.
	pub(crate) async fn apply_transfers(
		&self,
		session: Option<u64>,
		records: Vec<TransferRecord>,
	) -> Result<usize, WalletSyncError> {
		if let Some(generation) = session {
			let pending: Vec<TransferRecord> = {
				let core = self.lock();
				self.check_session(&core, generation)?;
				records
					.iter()
					.filter(|record| {
						self.wallet_for_uids(&record.currency_uids)
							.is_some_and(|wallet| wallet.would_change(&record.hash, &record.state))
					})
					.cloned()
					.collect()
			};
			if !pending.is_empty() {
				self.persist_transfers(pending).await?;
			}
		}

		let core = self.lock();
		if let Some(generation) = session {
			self.check_session(&core, generation)?;
		}

		let format = self.inner.network.transaction_format();
		let mut changed = 0usize;
		let mut touched: Vec<WalletId> = Vec::new();

		for record in records {
			let Some(wallet) = self.wallet_for_uids(&record.currency_uids) else {
				debug!("Ignoring transfer {} of unknown currency {}", record.hash, record.currency_uids);
				continue;
			};

			let transfer = Transfer::new(wallet.id(), record.hash, record.state, format, record.raw);
			match wallet.merge_transfer(transfer) {
				TransferChange::Added(transfer) => {
					self.emit_transfer(&transfer, TransferEvent::Created);
					self.emit_wallet(wallet.id(), WalletEvent::TransferAdded { hash: record.hash });
				}
				TransferChange::Changed {
					transfer,
					old_state,
				} => {
					self.emit_transfer(
						&transfer,
						TransferEvent::Changed {
							old_state,
							new_state: transfer.state().clone(),
						},
					);
					self.emit_wallet(wallet.id(), WalletEvent::TransferChanged { hash: record.hash });
				}
				TransferChange::Unchanged => continue,
			}

			changed += 1;
			if !touched.contains(&wallet.id()) {
				touched.push(wallet.id());
			}
		}

		for wallet in touched {
			self.emit(WalletManagerEvent::WalletChanged { wallet });
		}
		drop(core);
		Ok(changed)
	}
}

impl PartialEq for WalletManager {
	fn eq(&self, other: &Self) -> bool {
		self.inner.system == other.inner.system && self.inner.id == other.inner.id
	}
}

impl Eq for WalletManager {}

impl fmt::Display for WalletManager {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.inner.network.currency().code)
	}
}

impl fmt::Debug for WalletManager {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WalletManager")
			.field("id", &self.inner.id)
			.field("network", &self.inner.network.uids())
			.field("mode", &self.inner.mode)
			.field("state", &self.state())
			.finish()
	}
}

