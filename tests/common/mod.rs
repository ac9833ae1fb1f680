#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, TxIn, TxOut, Witness};
use walletkit_state_sync::indexer::{RawTransaction, TransactionStatus};
use walletkit_state_sync::{
    Account, Event, EventHandler, EventRecorder, MemoryBlockchain, Network, System, SystemConfig,
    SystemEvent, WalletManager, WalletManagerEvent, WalletManagerState,
};

pub const BTC_TESTNET: &str = "bitcoin-testnet";
pub const ETH_ROPSTEN: &str = "ethereum-ropsten";
pub const WAIT: Duration = Duration::from_secs(10);

/// A consensus-serialized Bitcoin transaction, unique per `seed`.
pub fn btc_tx(seed: u32) -> Vec<u8> {
    let tx = bitcoin::Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: ScriptBuf::from_bytes(seed.to_le_bytes().to_vec()),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(50_000 + seed as u64),
            script_pubkey: ScriptBuf::new(),
        }],
    };
    bitcoin::consensus::serialize(&tx)
}

pub fn native_uids(network_uids: &str) -> String {
    format!("{network_uids}:__native__")
}

pub fn confirmed(currency_uids: &str, data: Vec<u8>, block_height: u64) -> RawTransaction {
    RawTransaction {
        currency_uids: currency_uids.to_string(),
        status: TransactionStatus::Confirmed,
        block_height: Some(block_height),
        timestamp: Some(1_600_000_000 + block_height),
        data,
    }
}

pub fn pending(currency_uids: &str, data: Vec<u8>) -> RawTransaction {
    RawTransaction {
        currency_uids: currency_uids.to_string(),
        status: TransactionStatus::Pending,
        block_height: None,
        timestamp: None,
        data,
    }
}

/// A testnet chain holding `count` confirmed Bitcoin transactions, tip at 1_000.
pub fn btc_chain(count: u32) -> MemoryBlockchain {
    let chain = MemoryBlockchain::new();
    for seed in 0..count {
        chain.add_transaction(
            BTC_TESTNET,
            confirmed(&native_uids(BTC_TESTNET), btc_tx(seed), 100 + seed as u64 * 10),
        );
    }
    chain.set_height(BTC_TESTNET, 1_000);
    chain
}

pub fn test_config(path: &Path) -> SystemConfig {
    let mut config = SystemConfig::with_path(path);
    config.sync.request_timeout = Duration::from_secs(5);
    config.dispatch.slow_handler_threshold = Duration::from_secs(5);
    config
}

pub fn new_system(
    config: SystemConfig,
    chain: &MemoryBlockchain,
    handlers: Vec<Box<dyn EventHandler>>,
) -> System {
    System::new(
        config,
        Account::new("test-account", 1_600_000_000),
        Arc::new(chain.clone()),
        handlers,
    )
    .expect("system")
}

/// A configured system with a recorder attached.
pub async fn recorded_system(path: &Path, chain: &MemoryBlockchain) -> (System, EventRecorder) {
    let recorder = EventRecorder::new();
    let system = new_system(test_config(path), chain, vec![recorder.handler()]);
    system.configure().await;
    (system, recorder)
}

pub fn network(system: &System, uids: &str) -> Arc<Network> {
    system.network_by_uids(uids).expect("network discovered")
}

pub fn changed(old_state: WalletManagerState, new_state: WalletManagerState) -> WalletManagerEvent {
    WalletManagerEvent::Changed {
        old_state,
        new_state,
    }
}

pub fn count_sync_ended(recorder: &EventRecorder, manager: &WalletManager) -> usize {
    recorder
        .manager_events(manager.id())
        .iter()
        .filter(|event| matches!(event, WalletManagerEvent::SyncEnded { .. }))
        .count()
}

pub fn count_sync_started(recorder: &EventRecorder, manager: &WalletManager) -> usize {
    recorder
        .manager_events(manager.id())
        .iter()
        .filter(|event| matches!(event, WalletManagerEvent::SyncStarted))
        .count()
}

/// Wait for the first sync pass of `manager` to end and the manager to be connected again.
pub async fn wait_for_sync(recorder: &EventRecorder, manager: &WalletManager, passes: usize) -> bool {
    let id = manager.id();
    recorder
        .wait_for(WAIT, move |events| {
            events
                .iter()
                .filter(|event| {
                    matches!(
                        event,
                        Event::Manager {
                            manager,
                            event: WalletManagerEvent::Changed {
                                old_state: WalletManagerState::Syncing,
                                new_state: WalletManagerState::Connected,
                            },
                        } if *manager == id
                    )
                })
                .count()
                >= passes
        })
        .await
}

pub async fn wait_for_manager_added(recorder: &EventRecorder) -> bool {
    recorder
        .wait_for(WAIT, |events| {
            events
                .iter()
                .any(|event| matches!(event, Event::System(SystemEvent::ManagerAdded { .. })))
        })
        .await
}
