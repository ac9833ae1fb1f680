//! The system: network registry, wallet manager factory and migration entry point.
//!
//! A `System` is created for one account and one storage root. `configure` discovers the
//! networks for the configured chain (mainnet or testnets) and announces each with
//! `NetworkAdded`; handlers typically react by migrating legacy storage and creating a wallet
//! manager for the networks they care about. The system owns its managers, which own their
//! wallets; managers and wallets refer back by id only.

use crate::config::SystemConfig;
use crate::events::dispatcher::EventSender;
use crate::events::{Event, EventDispatcher, EventHandler, SystemEvent};
use crate::indexer::BlockchainQuery;
use crate::migration::{
    BlockBlob, MigrationError, Migrator, PeerBlob, TransactionBlob, UNCONFIRMED_HEIGHT,
};
use crate::network::{
    AddressScheme, Network, TransactionFormat, WalletManagerMode, builtin_networks,
};
use crate::wallet::manager::ManagerParams;
use crate::wallet::sync::state_persistence::StatePersistenceService;
use crate::wallet::{
    ManagerId, SystemId, Transfer, TransferState, Wallet, WalletManager, WalletSyncError,
};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// The user account a system manages wallets for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub identifier: String,
    /// Creation time in seconds since the epoch; nothing older needs to be synced.
    pub timestamp: u64,
    /// Receive addresses per network uids.
    pub addresses: HashMap<String, Vec<String>>,
}

impl Account {
    pub fn new(identifier: impl Into<String>, timestamp: u64) -> Self {
        Self {
            identifier: identifier.into(),
            timestamp,
            addresses: HashMap::new(),
        }
    }

    pub fn with_addresses(mut self, network_uids: &str, addresses: Vec<String>) -> Self {
        self.addresses.insert(network_uids.to_string(), addresses);
        self
    }

    pub fn addresses_for(&self, network: &Network) -> Vec<String> {
        self.addresses
            .get(network.uids())
            .cloned()
            .unwrap_or_default()
    }
}

pub(crate) struct SystemInner {
    id: SystemId,
    account: Account,
    config: SystemConfig,
    query: Arc<dyn BlockchainQuery>,
    runtime: Handle,
    events: EventSender,
    networks: RwLock<Vec<Arc<Network>>>,
    managers: RwLock<Vec<WalletManager>>,
    next_manager_id: AtomicU32,
    /// Serializes discovery, migration and manager creation.
    lifecycle: tokio::sync::Mutex<()>,
}

/// Top-level registry of networks and wallet managers.
#[derive(Clone)]
pub struct System {
    inner: Arc<SystemInner>,
}

impl System {
    /// Create a system and start its event dispatcher on the current runtime.
    ///
    /// `handlers` receive every event from `SystemEvent::Created` on.
    pub fn new(
        config: SystemConfig,
        account: Account,
        query: Arc<dyn BlockchainQuery>,
        handlers: Vec<Box<dyn EventHandler>>,
    ) -> Result<Self, WalletSyncError> {
        let runtime = Handle::try_current()?;
        let (events, rx) = EventSender::channel();

        let mut dispatcher = EventDispatcher::new(config.dispatch.slow_handler_threshold);
        for handler in handlers {
            dispatcher.register_handler(handler);
        }

        let inner = Arc::new(SystemInner {
            id: SystemId(rand::random()),
            account,
            config,
            query,
            runtime: runtime.clone(),
            events,
            networks: RwLock::new(Vec::new()),
            managers: RwLock::new(Vec::new()),
            next_manager_id: AtomicU32::new(1),
            lifecycle: tokio::sync::Mutex::new(()),
        });

        runtime.spawn(dispatcher.run(rx, Arc::downgrade(&inner)));

        let system = Self { inner };
        info!(
            "Created system {} for account {} at {:?}",
            system.inner.id.0,
            system.inner.account.identifier,
            system.inner.config.path
        );
        system.emit(SystemEvent::Created);
        Ok(system)
    }

    pub(crate) fn from_inner(inner: Arc<SystemInner>) -> Self {
        Self { inner }
    }

    #[cfg(test)]
    pub(crate) fn downgrade(&self) -> std::sync::Weak<SystemInner> {
        Arc::downgrade(&self.inner)
    }

    fn emit(&self, event: SystemEvent) {
        self.inner.events.emit(Event::System(event));
    }

    pub fn id(&self) -> SystemId {
        self.inner.id
    }

    pub fn account(&self) -> &Account {
        &self.inner.account
    }

    /// Storage root.
    pub fn path(&self) -> &Path {
        &self.inner.config.path
    }

    pub fn on_mainnet(&self) -> bool {
        self.inner.config.on_mainnet
    }

    pub fn config(&self) -> &SystemConfig {
        &self.inner.config
    }

    /// Register another handler. It receives every event emitted after this call.
    pub fn add_handler(&self, handler: Box<dyn EventHandler>) {
        self.inner.events.register(handler);
    }

    /// Wait until every event emitted before this call has been delivered.
    ///
    /// Must not be awaited from inside an event handler.
    pub async fn flush(&self) {
        self.inner.events.flush().await;
    }

    /// Discover the networks of the configured chain.
    ///
    /// Emits `NetworkAdded` for each network, then `DiscoveredNetworks`. Calling it again
    /// returns the networks already known without emitting anything.
    pub async fn configure(&self) -> Vec<Arc<Network>> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let known = self.networks();
        if !known.is_empty() {
            debug!("System {} already configured", self.inner.id.0);
            return known;
        }

        let on_mainnet = self.inner.config.on_mainnet;
        let candidates: Vec<Network> = builtin_networks()
            .into_iter()
            .filter(|network| network.is_mainnet() == on_mainnet)
            .collect();

        let timeout = self.inner.config.sync.request_timeout;
        let heights = join_all(candidates.iter().map(|network| async move {
            tokio::time::timeout(timeout, self.inner.query.get_block_height(network.uids())).await
        }))
        .await;

        let mut discovered = Vec::with_capacity(candidates.len());
        for (network, height) in candidates.into_iter().zip(heights) {
            let height = match height {
                Ok(Ok(height)) => height,
                Ok(Err(e)) => {
                    warn!("Failed to get block height of {}: {}", network.uids(), e);
                    0
                }
                Err(_) => {
                    warn!("Timed out getting block height of {}", network.uids());
                    0
                }
            };

            let network = Arc::new(network.with_height(height));
            info!("Discovered {} at height {}", network.uids(), height);
            self.inner
                .networks
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .push(network.clone());
            self.emit(SystemEvent::NetworkAdded {
                network: network.clone(),
            });
            discovered.push(network);
        }

        self.emit(SystemEvent::DiscoveredNetworks {
            networks: discovered.clone(),
        });
        discovered
    }

    pub fn networks(&self) -> Vec<Arc<Network>> {
        self.inner
            .networks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn network_by_uids(&self, uids: &str) -> Option<Arc<Network>> {
        self.inner
            .networks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|network| network.uids() == uids)
            .cloned()
    }

    pub fn managers(&self) -> Vec<WalletManager> {
        self.inner
            .managers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn manager(&self, id: ManagerId) -> Option<WalletManager> {
        self.managers().into_iter().find(|manager| manager.id() == id)
    }

    pub fn manager_for_network(&self, network: &Network) -> Option<WalletManager> {
        self.managers()
            .into_iter()
            .find(|manager| manager.network() == network)
    }

    /// Wallets of every manager.
    pub fn wallets(&self) -> Vec<Wallet> {
        self.managers()
            .iter()
            .flat_map(|manager| manager.wallets())
            .collect()
    }

    pub fn supported_modes(&self, network: &Network) -> Vec<WalletManagerMode> {
        network.modes().to_vec()
    }

    pub fn default_mode(&self, network: &Network) -> WalletManagerMode {
        network.default_mode()
    }

    pub fn supported_address_schemes(&self, network: &Network) -> Vec<AddressScheme> {
        network.address_schemes().to_vec()
    }

    pub fn default_address_scheme(&self, network: &Network) -> AddressScheme {
        network.default_address_scheme()
    }

    /// Whether `network` keeps its data in a format that needs importing before first use.
    pub fn migrate_required(&self, network: &Network) -> bool {
        network.storage_format().requires_migration()
    }

    /// Import legacy blobs into the store of `network`, all or nothing.
    ///
    /// Must complete before the manager for `network` is created. The import runs on a task of
    /// its own: once started it finishes even if the caller stops waiting for it.
    pub async fn migrate_storage(
        &self,
        network: &Network,
        transaction_blobs: &[TransactionBlob],
        block_blobs: &[BlockBlob],
        peer_blobs: &[PeerBlob],
    ) -> Result<(), MigrationError> {
        if !self.migrate_required(network) {
            return Err(MigrationError::NotRequired(network.uids().to_string()));
        }

        let system = self.clone();
        let network = network.clone();
        let transaction_blobs = transaction_blobs.to_vec();
        let block_blobs = block_blobs.to_vec();
        let peer_blobs = peer_blobs.to_vec();
        let import = self.inner.runtime.spawn(async move {
            system
                .import_legacy(&network, &transaction_blobs, &block_blobs, &peer_blobs)
                .await
        });
        import
            .await
            .map_err(|e| MigrationError::Storage(format!("Migration task failed: {}", e)))?
    }

    async fn import_legacy(
        &self,
        network: &Network,
        transaction_blobs: &[TransactionBlob],
        block_blobs: &[BlockBlob],
        peer_blobs: &[PeerBlob],
    ) -> Result<(), MigrationError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.manager_for_network(network).is_some() {
            return Err(MigrationError::ManagerExists(network.uids().to_string()));
        }

        info!(
            "Migrating {} transactions, {} blocks and {} peers into {}",
            transaction_blobs.len(),
            block_blobs.len(),
            peer_blobs.len(),
            network.uids()
        );
        let persistence = StatePersistenceService::new(&self.inner.config.path, network);
        Migrator::new(network)
            .migrate(&persistence, transaction_blobs, block_blobs, peer_blobs)
            .await?;
        Ok(())
    }

    /// Create the wallet manager for a discovered network.
    ///
    /// Transfers already in the network's store (for example from a migration) are loaded and
    /// announced before this returns.
    pub async fn create_wallet_manager(
        &self,
        network: &Network,
        mode: WalletManagerMode,
        address_scheme: AddressScheme,
    ) -> Result<WalletManager, WalletSyncError> {
        let network = self
            .network_by_uids(network.uids())
            .ok_or_else(|| WalletSyncError::UnknownNetwork(network.uids().to_string()))?;
        if !network.modes().contains(&mode) {
            return Err(WalletSyncError::UnsupportedMode {
                network: network.uids().to_string(),
                mode,
            });
        }
        if !network.address_schemes().contains(&address_scheme) {
            return Err(WalletSyncError::UnsupportedAddressScheme {
                network: network.uids().to_string(),
                scheme: address_scheme,
            });
        }

        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.manager_for_network(&network).is_some() {
            return Err(WalletSyncError::ManagerExists(network.uids().to_string()));
        }

        let persistence = Arc::new(StatePersistenceService::new(
            &self.inner.config.path,
            &network,
        ));
        let records = persistence.load_transfers().await?;

        let manager = WalletManager::new(ManagerParams {
            id: ManagerId(self.inner.next_manager_id.fetch_add(1, Ordering::Relaxed)),
            system: self.inner.id,
            addresses: self.inner.account.addresses_for(&network),
            network: network.clone(),
            mode,
            address_scheme,
            persistence,
            query: self.inner.query.clone(),
            config: self.inner.config.sync.clone(),
            events: self.inner.events.clone(),
            runtime: self.inner.runtime.clone(),
        });
        self.inner
            .managers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(manager.clone());

        info!(
            "Created {} manager for {} in mode {}",
            manager,
            network.uids(),
            mode
        );
        manager.announce_created();
        self.emit(SystemEvent::ManagerAdded {
            manager: manager.id(),
        });

        if !records.is_empty() {
            info!("Loading {} stored transfers for {}", records.len(), network.uids());
            manager.apply_transfers(None, records).await?;
        }
        Ok(manager)
    }

    /// Disconnect every manager.
    pub fn disconnect_all(&self) {
        for manager in self.managers() {
            if let Err(e) = manager.disconnect() {
                warn!("Failed to disconnect {}: {}", manager, e);
            }
        }
    }

    /// Export a transfer in the form `migrate_storage` accepts.
    ///
    /// Returns `None` for transfers without a hash and for failed transfers.
    pub fn as_blob(&self, transfer: &Transfer) -> Option<TransactionBlob> {
        transfer.hash()?;
        let (block_height, timestamp) = match transfer.state() {
            TransferState::Included {
                block_height,
                timestamp,
            } => (
                u32::try_from(*block_height).ok()?,
                u32::try_from(*timestamp).unwrap_or(u32::MAX),
            ),
            TransferState::Created => (UNCONFIRMED_HEIGHT, 0),
            TransferState::Failed { .. } => return None,
        };

        let bytes = transfer.raw().to_vec();
        Some(match transfer.format() {
            TransactionFormat::Bitcoin => TransactionBlob::Btc {
                bytes,
                block_height,
                timestamp,
            },
            TransactionFormat::Opaque => TransactionBlob::Eth {
                bytes,
                block_height,
                timestamp,
            },
        })
    }
}

impl std::fmt::Debug for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("System")
            .field("id", &self.inner.id)
            .field("path", &self.inner.config.path)
            .field("on_mainnet", &self.inner.config.on_mainnet)
            .finish()
    }
}
