use walletkit_state_sync::config::addresses_from_env;
use walletkit_state_sync::indexer::{RawTransaction, TransactionStatus};
use walletkit_state_sync::{
	Account, BlockchainQuery, BlocksetClient, Event, EventHandler, EventRecorder, MemoryBlockchain,
	SystemConfig, SystemEvent, System, WalletManagerEvent, WalletSyncError,
};

use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, TxIn, TxOut, Witness};
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Logs every event it receives.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
	async fn handle(&mut self, _system: &System, event: &Event) -> Result<(), WalletSyncError> {
		match event {
			Event::System(event) => info!("system: {:?}", event),
			Event::Manager { manager, event } => info!("{}: {:?}", manager, event),
			Event::Wallet { wallet, event } => info!("{}: {:?}", wallet, event),
			Event::Transfer {
				transfer, event, ..
			} => info!(
				"transfer {}: {:?}",
				transfer.hash().map(|hash| hash.to_string()).unwrap_or_default(),
				event
			),
		}
		Ok(())
	}

	fn name(&self) -> &'static str {
		"LoggingHandler"
	}
}

/// Creates and connects a manager for one network as soon as it is discovered.
struct BootstrapHandler {
	network_uids: String,
}

#[async_trait::async_trait]
impl EventHandler for BootstrapHandler {
	async fn handle(&mut self, system: &System, event: &Event) -> Result<(), WalletSyncError> {
		let Event::System(SystemEvent::NetworkAdded { network }) = event else {
			return Ok(());
		};
		if network.uids() != self.network_uids {
			return Ok(());
		}

		let manager = system
			.create_wallet_manager(
				network,
				system.default_mode(network),
				system.default_address_scheme(network),
			)
			.await?;
		manager.connect()
	}

	fn name(&self) -> &'static str {
		"BootstrapHandler"
	}
}

fn demo_transaction(rng: &mut impl Rng) -> Vec<u8> {
	let mut script = [0u8; 16];
	rng.fill(&mut script);
	let tx = bitcoin::Transaction {
		version: Version::TWO,
		lock_time: LockTime::ZERO,
		input: vec![TxIn {
			previous_output: OutPoint::null(),
			script_sig: ScriptBuf::from_bytes(script.to_vec()),
			sequence: Sequence::MAX,
			witness: Witness::new(),
		}],
		output: vec![TxOut {
			value: Amount::from_sat(rng.random_range(1_000..1_000_000)),
			script_pubkey: ScriptBuf::new(),
		}],
	};
	bitcoin::consensus::serialize(&tx)
}

/// An in-memory testnet with a few confirmed transactions and one pending.
fn demo_chain(network_uids: &str) -> MemoryBlockchain {
	let chain = MemoryBlockchain::new();
	let mut rng = rand::rng();
	let currency_uids = format!("{network_uids}:__native__");

	for height in [2_500_010u64, 2_500_200, 2_501_000] {
		chain.add_transaction(
			network_uids,
			RawTransaction {
				currency_uids: currency_uids.clone(),
				status: TransactionStatus::Confirmed,
				block_height: Some(height),
				timestamp: Some(1_600_000_000 + height),
				data: demo_transaction(&mut rng),
			},
		);
	}
	chain.add_transaction(
		network_uids,
		RawTransaction {
			currency_uids,
			status: TransactionStatus::Pending,
			block_height: None,
			timestamp: None,
			data: demo_transaction(&mut rng),
		},
	);
	chain.set_height(network_uids, 2_501_100);
	chain
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive("walletkit_state_sync=debug".parse()?)
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	info!("Starting wallet manager demo");

	let config = match std::env::args().nth(1) {
		Some(path) => SystemConfig::from_file(&PathBuf::from(path))?,
		None => SystemConfig::default(),
	}
	.with_env_overrides();

	let network_uids = if config.on_mainnet {
		"bitcoin-mainnet"
	} else {
		"bitcoin-testnet"
	};

	let addresses = addresses_from_env();
	let query: Arc<dyn BlockchainQuery> = if std::env::var("WALLETKIT_INDEXER_URL").is_ok() {
		info!("Using indexer at {}", config.indexer.endpoint);
		if addresses.is_empty() {
			warn!("WALLETKIT_ADDRESSES is not set, the indexer will return no transactions");
		}
		Arc::new(BlocksetClient::from_config(&config.indexer)?)
	} else {
		info!("Using in-memory chain");
		Arc::new(demo_chain(network_uids))
	};

	info!("Watching {} addresses on {}", addresses.len(), network_uids);
	let account =
		Account::new("demo-account", 1_600_000_000).with_addresses(network_uids, addresses);
	let recorder = EventRecorder::new();
	let system = System::new(
		config,
		account,
		query,
		vec![
			Box::new(LoggingHandler) as Box<dyn EventHandler>,
			Box::new(BootstrapHandler {
				network_uids: network_uids.to_string(),
			}),
			recorder.handler(),
		],
	)?;

	let networks = system.configure().await;
	info!("Discovered {} networks", networks.len());

	let synced = recorder
		.wait_for(Duration::from_secs(120), |events| {
			events.iter().any(|event| {
				matches!(
					event,
					Event::Manager {
						event: WalletManagerEvent::SyncEnded { .. },
						..
					}
				)
			})
		})
		.await;
	if !synced {
		warn!("Sync did not finish in time");
	}

	match system.managers().first() {
		Some(manager) => {
			let wallet = manager.primary_wallet();
			info!(
				"{} wallet holds {} transfers at height {}",
				wallet.name(),
				wallet.transfer_count(),
				manager.height()
			);
			for transfer in wallet.transfers() {
				info!("  {:?} {}", transfer.hash(), transfer.state());
			}
		}
		None => error!("No wallet manager was created for {}", network_uids),
	}

	system.disconnect_all();
	system.flush().await;
	info!("Demo finished");
	Ok(())
}
