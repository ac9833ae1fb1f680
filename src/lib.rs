//! Multi-network wallet management.
//!
//! A [`System`] discovers networks and creates one [`WalletManager`] per network. Managers
//! connect, sync their wallets through a [`BlockchainQuery`] collaborator and report every state
//! change as an [`Event`] delivered to registered [`EventHandler`]s. Legacy stores can be
//! imported with [`System::migrate_storage`] before a manager is created.

pub mod config;
pub mod events;
pub mod indexer;
pub mod migration;
pub mod network;
pub mod system;
pub mod wallet;

pub use config::SystemConfig;
pub use events::{
    Event, EventFamily, EventHandler, EventMatcher, EventRecorder, SystemEvent, TransferEvent,
    WalletEvent, WalletManagerEvent, check_events, check_exact,
};
pub use indexer::{BlockchainQuery, BlocksetClient, IndexerError, MemoryBlockchain};
pub use migration::{BlockBlob, MigrationError, PeerBlob, TransactionBlob};
pub use network::{AddressScheme, Currency, Network, WalletManagerMode};
pub use system::{Account, System};
pub use wallet::{
    ManagerId, SyncFailure, Transfer, TransferHash, TransferState, Wallet, WalletId,
    WalletManager, WalletManagerState, WalletSyncError,
};
