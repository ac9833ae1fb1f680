mod common;

use common::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use walletkit_state_sync::{
    AddressScheme, Event, EventHandler, EventMatcher, EventRecorder, SyncFailure, System,
    SystemEvent, TransferEvent, WalletEvent, WalletManagerEvent, WalletManagerMode,
    WalletManagerState, WalletSyncError, check_events,
};

use WalletManagerState::{Connected, Created, Disconnected, Syncing};

#[tokio::test]
async fn api_sync_reports_lifecycle_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let chain = btc_chain(5);
    let (system, recorder) = recorded_system(dir.path(), &chain).await;
    let btc = network(&system, BTC_TESTNET);

    let manager = system
        .create_wallet_manager(&btc, WalletManagerMode::ApiOnly, AddressScheme::BtcSegwit)
        .await
        .expect("create manager");
    manager.connect().expect("connect");
    assert!(wait_for_sync(&recorder, &manager, 1).await, "sync did not finish");

    manager.disconnect().expect("disconnect");
    system.flush().await;

    let primary = manager.primary_wallet();
    let matchers = vec![
        EventMatcher::new(WalletManagerEvent::Created),
        EventMatcher::new(WalletManagerEvent::WalletAdded {
            wallet: primary.id(),
        }),
        EventMatcher::new(changed(Created, Connected)),
        EventMatcher::new(WalletManagerEvent::SyncStarted),
        EventMatcher::new(changed(Connected, Syncing)),
        EventMatcher::new(WalletManagerEvent::SyncEnded { error: None }).scan(true),
        EventMatcher::new(changed(Syncing, Connected)),
        EventMatcher::new(changed(Connected, Disconnected)),
    ];
    let observed = recorder.manager_events(manager.id());
    assert!(check_events(&observed, &matchers), "unexpected events {:?}", observed);

    assert_eq!(5, primary.transfer_count());
    assert_eq!(Disconnected, manager.state());
    assert_eq!(1_000, manager.height());
    assert!(primary
        .transfers()
        .iter()
        .all(|transfer| transfer.state().is_included()));
}

#[tokio::test]
async fn disconnect_when_disconnected_emits_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let chain = btc_chain(1);
    let (system, recorder) = recorded_system(dir.path(), &chain).await;
    let btc = network(&system, BTC_TESTNET);
    let manager = system
        .create_wallet_manager(&btc, WalletManagerMode::ApiOnly, AddressScheme::BtcSegwit)
        .await
        .expect("create manager");

    manager.connect().expect("connect");
    assert!(wait_for_sync(&recorder, &manager, 1).await);
    manager.disconnect().expect("disconnect");
    system.flush().await;
    let before = recorder.manager_events(manager.id()).len();

    manager.disconnect().expect("second disconnect");
    system.flush().await;

    assert_eq!(before, recorder.manager_events(manager.id()).len());
    assert_eq!(Disconnected, manager.state());
}

#[tokio::test]
async fn connect_while_connected_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let chain = btc_chain(1);
    let (system, recorder) = recorded_system(dir.path(), &chain).await;
    let btc = network(&system, BTC_TESTNET);
    let manager = system
        .create_wallet_manager(&btc, WalletManagerMode::ApiOnly, AddressScheme::BtcSegwit)
        .await
        .expect("create manager");

    manager.connect().expect("connect");
    assert!(wait_for_sync(&recorder, &manager, 1).await);

    match manager.connect() {
        Err(WalletSyncError::InvalidTransition { operation, state }) => {
            assert_eq!("connect", operation);
            assert_eq!(Connected, state);
        }
        other => panic!("expected an invalid transition, got {:?}", other),
    }
    manager.disconnect().expect("disconnect");
}

#[tokio::test]
async fn disconnect_cancels_running_sync_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let chain = btc_chain(3);
    let (system, recorder) = recorded_system(dir.path(), &chain).await;
    let btc = network(&system, BTC_TESTNET);
    let manager = system
        .create_wallet_manager(&btc, WalletManagerMode::ApiOnly, AddressScheme::BtcSegwit)
        .await
        .expect("create manager");

    chain.set_latency(Duration::from_millis(500));
    manager.connect().expect("connect");
    assert!(
        recorder
            .wait_for_manager_state(WAIT, manager.id(), Syncing)
            .await
    );

    manager.disconnect().expect("disconnect");
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    system.flush().await;

    let observed = recorder.manager_events(manager.id());
    let matchers = vec![
        EventMatcher::new(WalletManagerEvent::SyncStarted).scan(true),
        EventMatcher::new(changed(Connected, Syncing)),
        EventMatcher::new(WalletManagerEvent::SyncEnded {
            error: Some(SyncFailure::Cancelled),
        })
        .scan(true),
        EventMatcher::new(changed(Syncing, Disconnected)),
    ];
    assert!(check_events(&observed, &matchers), "unexpected events {:?}", observed);
    assert_eq!(1, count_sync_ended(&recorder, &manager));
    assert_eq!(Disconnected, manager.state());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rapid_connect_cycles_pair_every_sync() {
    let dir = tempfile::tempdir().expect("tempdir");
    let chain = btc_chain(4);
    let (system, recorder) = recorded_system(dir.path(), &chain).await;
    let btc = network(&system, BTC_TESTNET);
    let manager = system
        .create_wallet_manager(&btc, WalletManagerMode::P2pOnly, AddressScheme::BtcLegacy)
        .await
        .expect("create manager");

    chain.set_latency(Duration::from_millis(5));
    for round in 0..10u64 {
        manager.connect().expect("connect");
        tokio::time::sleep(Duration::from_millis(round * 3)).await;
        manager.disconnect().expect("disconnect");
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    system.flush().await;

    assert_eq!(
        count_sync_started(&recorder, &manager),
        count_sync_ended(&recorder, &manager)
    );
    assert_eq!(Disconnected, manager.state());

    // Each session still ends in a well-formed state sequence
    let transitions: Vec<_> = recorder
        .manager_events(manager.id())
        .into_iter()
        .filter_map(|event| match event {
            WalletManagerEvent::Changed {
                old_state,
                new_state,
            } => Some((old_state, new_state)),
            _ => None,
        })
        .collect();
    for pair in transitions.windows(2) {
        assert_eq!(pair[0].1, pair[1].0, "broken transition chain {:?}", transitions);
    }
}

#[tokio::test]
async fn unreachable_network_ends_sync_with_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let chain = btc_chain(2);
    let (system, recorder) = recorded_system(dir.path(), &chain).await;
    let btc = network(&system, BTC_TESTNET);
    let manager = system
        .create_wallet_manager(&btc, WalletManagerMode::ApiOnly, AddressScheme::BtcSegwit)
        .await
        .expect("create manager");

    chain.fail_next_requests(1);
    manager.connect().expect("connect");
    assert!(wait_for_sync(&recorder, &manager, 1).await);
    system.flush().await;

    let observed = recorder.manager_events(manager.id());
    let ended: Vec<_> = observed
        .iter()
        .filter_map(|event| match event {
            WalletManagerEvent::SyncEnded { error } => Some(error.clone()),
            _ => None,
        })
        .collect();
    assert!(
        matches!(ended.as_slice(), [Some(SyncFailure::Unreachable(_))]),
        "unexpected sync results {:?}",
        ended
    );
    assert_eq!(Connected, manager.state());
    assert_eq!(0, manager.primary_wallet().transfer_count());

    manager.disconnect().expect("disconnect");
}

#[tokio::test]
async fn resync_interval_runs_repeated_passes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let chain = btc_chain(2);
    let recorder = walletkit_state_sync::EventRecorder::new();
    let mut config = test_config(dir.path());
    config.sync.resync_interval = Some(Duration::from_millis(50));
    let system = new_system(config, &chain, vec![recorder.handler()]);
    system.configure().await;

    let btc = network(&system, BTC_TESTNET);
    let manager = system
        .create_wallet_manager(&btc, WalletManagerMode::ApiOnly, AddressScheme::BtcSegwit)
        .await
        .expect("create manager");
    manager.connect().expect("connect");

    // A transaction appearing between passes is picked up by the next one
    assert!(wait_for_sync(&recorder, &manager, 1).await);
    chain.add_transaction(
        BTC_TESTNET,
        confirmed(&native_uids(BTC_TESTNET), btc_tx(99), 1_001),
    );
    assert!(wait_for_sync(&recorder, &manager, 3).await);
    manager.disconnect().expect("disconnect");
    system.flush().await;

    assert!(count_sync_ended(&recorder, &manager) >= 2);
    assert_eq!(3, manager.primary_wallet().transfer_count());
    assert!(recorder
        .manager_events(manager.id())
        .contains(&WalletManagerEvent::BlockUpdated { height: 1_001 }));
}

#[tokio::test]
async fn pending_transfer_is_included_on_later_pass() {
    let dir = tempfile::tempdir().expect("tempdir");
    let chain = btc_chain(0);
    let data = btc_tx(7);
    chain.add_transaction(BTC_TESTNET, pending(&native_uids(BTC_TESTNET), data.clone()));
    let (system, recorder) = recorded_system(dir.path(), &chain).await;
    let btc = network(&system, BTC_TESTNET);
    let manager = system
        .create_wallet_manager(&btc, WalletManagerMode::ApiOnly, AddressScheme::BtcSegwit)
        .await
        .expect("create manager");

    manager.connect().expect("connect");
    assert!(wait_for_sync(&recorder, &manager, 1).await);
    manager.disconnect().expect("disconnect");

    assert!(chain.confirm_transaction(BTC_TESTNET, &data, 1_002, 1_600_001_002));
    manager.connect().expect("reconnect");
    assert!(wait_for_sync(&recorder, &manager, 2).await);
    manager.disconnect().expect("disconnect");
    system.flush().await;

    let transfers = recorder.manager_transfer_events(manager.id());
    let kinds: Vec<_> = transfers.iter().map(|(_, event)| event.clone()).collect();
    assert_eq!(
        vec![
            TransferEvent::Created,
            TransferEvent::Changed {
                old_state: walletkit_state_sync::TransferState::Created,
                new_state: walletkit_state_sync::TransferState::Included {
                    block_height: 1_002,
                    timestamp: 1_600_001_002,
                },
            },
        ],
        kinds
    );
    let primary = manager.primary_wallet();
    let hash = transfers[0].0.hash().expect("hash");
    assert_eq!(
        vec![
            WalletEvent::Created,
            WalletEvent::TransferAdded { hash },
            WalletEvent::TransferChanged { hash },
        ],
        recorder.wallet_events(primary.id())
    );
}

#[tokio::test]
async fn stored_transfers_survive_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let chain = btc_chain(4);
    {
        let (system, recorder) = recorded_system(dir.path(), &chain).await;
        let btc = network(&system, BTC_TESTNET);
        let manager = system
            .create_wallet_manager(&btc, WalletManagerMode::ApiOnly, AddressScheme::BtcSegwit)
            .await
            .expect("create manager");
        manager.connect().expect("connect");
        assert!(wait_for_sync(&recorder, &manager, 1).await);
        system.disconnect_all();
        system.flush().await;
    }

    let offline = btc_chain(0);
    let (system, recorder) = recorded_system(dir.path(), &offline).await;
    let btc = network(&system, BTC_TESTNET);
    let manager = system
        .create_wallet_manager(&btc, WalletManagerMode::ApiOnly, AddressScheme::BtcSegwit)
        .await
        .expect("create manager");
    system.flush().await;

    assert_eq!(Created, manager.state());
    assert_eq!(4, manager.primary_wallet().transfer_count());
    assert_eq!(4, recorder.manager_transfer_events(manager.id()).len());
    assert!(manager.path().starts_with(dir.path()));
}

#[tokio::test]
async fn failed_store_write_keeps_transfers_out_of_wallets() {
    let dir = tempfile::tempdir().expect("tempdir");
    let chain = btc_chain(3);
    {
        let (system, recorder) = recorded_system(dir.path(), &chain).await;
        let btc = network(&system, BTC_TESTNET);
        let manager = system
            .create_wallet_manager(&btc, WalletManagerMode::ApiOnly, AddressScheme::BtcSegwit)
            .await
            .expect("create manager");

        // A directory in place of the temporary file makes every transfer write fail
        let blocker = manager.path().join("transfers.bin.tmp");
        std::fs::create_dir_all(&blocker).expect("create blocker");

        manager.connect().expect("connect");
        assert!(wait_for_sync(&recorder, &manager, 1).await);
        manager.disconnect().expect("disconnect");
        system.flush().await;

        let ended: Vec<_> = recorder
            .manager_events(manager.id())
            .into_iter()
            .filter_map(|event| match event {
                WalletManagerEvent::SyncEnded { error } => Some(error),
                _ => None,
            })
            .collect();
        assert!(
            matches!(ended.as_slice(), [Some(SyncFailure::Failed(_))]),
            "unexpected sync results {:?}",
            ended
        );
        assert_eq!(0, manager.primary_wallet().transfer_count());
        assert!(recorder.manager_transfer_events(manager.id()).is_empty());

        // The next pass finds the same transfers new again and stores them
        std::fs::remove_dir(&blocker).expect("remove blocker");
        manager.connect().expect("reconnect");
        assert!(wait_for_sync(&recorder, &manager, 2).await);
        manager.disconnect().expect("disconnect");
        system.flush().await;
        assert_eq!(3, manager.primary_wallet().transfer_count());
    }

    let offline = btc_chain(0);
    let (system, _recorder) = recorded_system(dir.path(), &offline).await;
    let btc = network(&system, BTC_TESTNET);
    let manager = system
        .create_wallet_manager(&btc, WalletManagerMode::ApiOnly, AddressScheme::BtcSegwit)
        .await
        .expect("create manager");
    assert_eq!(3, manager.primary_wallet().transfer_count());
}

#[tokio::test]
async fn address_scheme_is_validated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let chain = btc_chain(0);
    let (system, _recorder) = recorded_system(dir.path(), &chain).await;
    let btc = network(&system, BTC_TESTNET);

    assert_eq!(
        vec![AddressScheme::BtcSegwit, AddressScheme::BtcLegacy],
        system.supported_address_schemes(&btc)
    );
    assert!(matches!(
        system
            .create_wallet_manager(&btc, WalletManagerMode::ApiOnly, AddressScheme::EthDefault)
            .await,
        Err(WalletSyncError::UnsupportedAddressScheme { .. })
    ));

    let manager = system
        .create_wallet_manager(
            &btc,
            system.default_mode(&btc),
            system.default_address_scheme(&btc),
        )
        .await
        .expect("create manager");
    assert_eq!(AddressScheme::BtcSegwit, manager.address_scheme());

    manager
        .set_address_scheme(AddressScheme::BtcLegacy)
        .expect("legacy is supported");
    assert_eq!(AddressScheme::BtcLegacy, manager.address_scheme());
    assert!(manager.set_address_scheme(AddressScheme::EthDefault).is_err());
    assert_eq!(AddressScheme::BtcLegacy, manager.address_scheme());

    assert!(matches!(
        system
            .create_wallet_manager(&btc, WalletManagerMode::ApiOnly, AddressScheme::BtcSegwit)
            .await,
        Err(WalletSyncError::ManagerExists(_))
    ));
}

#[tokio::test]
async fn events_follow_causal_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let chain = btc_chain(3);
    let (system, recorder) = recorded_system(dir.path(), &chain).await;
    let btc = network(&system, BTC_TESTNET);
    let manager = system
        .create_wallet_manager(&btc, WalletManagerMode::ApiOnly, AddressScheme::BtcSegwit)
        .await
        .expect("create manager");
    manager.connect().expect("connect");
    assert!(wait_for_sync(&recorder, &manager, 1).await);
    manager.disconnect().expect("disconnect");
    system.flush().await;

    let events = recorder.events();
    let created = events
        .iter()
        .position(|event| matches!(event, Event::System(SystemEvent::Created)));
    let network_added = events.iter().position(|event| {
        matches!(event, Event::System(SystemEvent::NetworkAdded { network }) if network.uids() == BTC_TESTNET)
    });
    let manager_added = events.iter().position(|event| {
        matches!(event, Event::System(SystemEvent::ManagerAdded { manager: id }) if *id == manager.id())
    });
    let wallet_created = events.iter().position(|event| {
        matches!(
            event,
            Event::Wallet {
                event: WalletEvent::Created,
                ..
            }
        )
    });
    let manager_created = events.iter().position(|event| {
        matches!(
            event,
            Event::Manager {
                event: WalletManagerEvent::Created,
                ..
            }
        )
    });
    let wallet_added = events.iter().position(|event| {
        matches!(
            event,
            Event::Manager {
                event: WalletManagerEvent::WalletAdded { .. },
                ..
            }
        )
    });
    let first_transfer = events
        .iter()
        .position(|event| matches!(event, Event::Transfer { .. }));

    assert!(network_added.is_some() && manager_added.is_some());
    assert_eq!(Some(0), created);
    assert!(network_added < manager_added);
    assert!(manager_created.is_some() && wallet_created.is_some() && wallet_added.is_some());
    assert!(manager_created < wallet_created);
    assert!(wallet_created < wallet_added);
    assert!(wallet_added < first_transfer);
    assert!(first_transfer.is_some());

    let discovered = recorder
        .system_events()
        .into_iter()
        .filter(|event| matches!(event, SystemEvent::DiscoveredNetworks { .. }))
        .count();
    assert_eq!(1, discovered);

    // Repeated discovery adds nothing
    system.configure().await;
    system.flush().await;
    assert_eq!(
        1,
        recorder
            .system_events()
            .into_iter()
            .filter(|event| matches!(event, SystemEvent::DiscoveredNetworks { .. }))
            .count()
    );
}

/// Records the primary wallet's transfer count each time a transfer is announced.
struct TransferCounter {
    counts: Arc<Mutex<Vec<usize>>>,
}

#[async_trait::async_trait]
impl EventHandler for TransferCounter {
    async fn handle(&mut self, system: &System, event: &Event) -> Result<(), WalletSyncError> {
        if let Event::Wallet {
            wallet,
            event: WalletEvent::TransferAdded { .. },
        } = event
        {
            if let Some(manager) = system.manager(wallet.manager) {
                let count = manager.primary_wallet().transfer_count();
                self.counts.lock().unwrap().push(count);
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "TransferCounter"
    }
}

#[tokio::test]
async fn transfer_count_only_grows_during_chunked_sync() {
    let dir = tempfile::tempdir().expect("tempdir");
    let chain = btc_chain(8);
    let recorder = EventRecorder::new();
    let counts = Arc::new(Mutex::new(Vec::new()));
    let counter: Box<dyn EventHandler> = Box::new(TransferCounter {
        counts: counts.clone(),
    });
    let mut config = test_config(dir.path());
    config.sync.walk_chunk_blocks = 20;
    let system = new_system(config, &chain, vec![counter, recorder.handler()]);
    system.configure().await;

    let btc = network(&system, BTC_TESTNET);
    let manager = system
        .create_wallet_manager(&btc, WalletManagerMode::P2pOnly, AddressScheme::BtcSegwit)
        .await
        .expect("create manager");
    manager.connect().expect("connect");
    assert!(wait_for_sync(&recorder, &manager, 1).await);
    manager.disconnect().expect("disconnect");
    system.flush().await;

    let counts = counts.lock().unwrap().clone();
    assert_eq!(8, counts.len());
    assert!(
        counts.windows(2).all(|pair| pair[0] <= pair[1]),
        "transfer count went down {:?}",
        counts
    );
    // Each announcement sees at least every transfer announced so far
    for (seen, count) in counts.iter().enumerate() {
        assert!(*count > seen, "announced transfer missing from wallet {:?}", counts);
    }
    assert_eq!(Some(&8), counts.last());
}

