//! Event system for systems, wallet managers, wallets and transfers.
//!
//! Every state change in the engine is published as an `Event` on a single ordered bus. The
//! producer never waits for listeners: events are queued and delivered by a dispatcher task to
//! every registered `EventHandler` in registration order. Because there is exactly one queue,
//! the order in which a handler observes events is the order in which they were emitted, which
//! gives the per-manager FIFO guarantee and the causal ordering between families (a manager's
//! `Created` before its `WalletAdded` before any transfer event of that wallet).
//!
//! Payloads are immutable snapshots; handlers that need live objects look them up on the
//! `System` passed alongside the event.

/// Ordered asynchronous delivery of events to handlers
pub mod dispatcher;
/// Recording handler and ordered-subsequence matching
pub mod recorder;

pub use dispatcher::{EventDispatcher, EventHandler};
pub use recorder::{EventMatcher, EventRecorder, check_events, check_exact};

use crate::network::Network;
use crate::wallet::{ManagerId, SyncFailure, Transfer, TransferHash, TransferState, WalletId, WalletManagerState};

use std::sync::Arc;

/// System-wide events
#[derive(Debug, Clone, PartialEq)]
pub enum SystemEvent {
    /// The system was constructed
    Created,
    /// A network was discovered; emitted before any manager for it exists
    NetworkAdded { network: Arc<Network> },
    /// Discovery finished
    DiscoveredNetworks { networks: Vec<Arc<Network>> },
    /// A wallet manager was constructed
    ManagerAdded { manager: ManagerId },
}

/// Events scoped to one wallet manager
#[derive(Debug, Clone, PartialEq)]
pub enum WalletManagerEvent {
    Created,
    Changed {
        old_state: WalletManagerState,
        new_state: WalletManagerState,
    },
    WalletAdded { wallet: WalletId },
    WalletChanged { wallet: WalletId },
    /// Immediately precedes the `Connected -> Syncing` transition
    SyncStarted,
    /// Best-effort; zero or more between `SyncStarted` and `SyncEnded`
    SyncProgress {
        timestamp: Option<u64>,
        percent_complete: f32,
    },
    /// Exactly one per sync attempt; `None` on success
    SyncEnded { error: Option<SyncFailure> },
    BlockUpdated { height: u64 },
}

/// Events scoped to one wallet
#[derive(Debug, Clone, PartialEq)]
pub enum WalletEvent {
    Created,
    TransferAdded { hash: TransferHash },
    TransferChanged { hash: TransferHash },
}

/// Events scoped to one transfer
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Created,
    Changed {
        old_state: TransferState,
        new_state: TransferState,
    },
}

/// Discriminates the four event families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventFamily {
    System,
    Manager,
    Wallet,
    Transfer,
}

impl EventFamily {
    pub const ALL: [EventFamily; 4] = [
        EventFamily::System,
        EventFamily::Manager,
        EventFamily::Wallet,
        EventFamily::Transfer,
    ];
}

/// An event together with the identity of the object it concerns.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    System(SystemEvent),
    Manager {
        manager: ManagerId,
        event: WalletManagerEvent,
    },
    Wallet {
        wallet: WalletId,
        event: WalletEvent,
    },
    Transfer {
        wallet: WalletId,
        transfer: Transfer,
        event: TransferEvent,
    },
}

impl Event {
    pub fn family(&self) -> EventFamily {
        match self {
            Event::System(_) => EventFamily::System,
            Event::Manager { .. } => EventFamily::Manager,
            Event::Wallet { .. } => EventFamily::Wallet,
            Event::Transfer { .. } => EventFamily::Transfer,
        }
    }

    /// The manager this event belongs to, if it is manager-scoped.
    pub fn manager(&self) -> Option<ManagerId> {
        match self {
            Event::System(SystemEvent::ManagerAdded { manager }) => Some(*manager),
            Event::System(_) => None,
            Event::Manager { manager, .. } => Some(*manager),
            Event::Wallet { wallet, .. } | Event::Transfer { wallet, .. } => Some(wallet.manager),
        }
    }

    pub fn wallet(&self) -> Option<WalletId> {
        match self {
            Event::Wallet { wallet, .. } | Event::Transfer { wallet, .. } => Some(*wallet),
            Event::Manager {
                event: WalletManagerEvent::WalletAdded { wallet },
                ..
            } => Some(*wallet),
            _ => None,
        }
    }
}
