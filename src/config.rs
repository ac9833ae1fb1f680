//! System configuration.
//!
//! Loaded from a JSON file with every field optional, then adjusted from the environment:
//! - `WALLETKIT_DATA_DIR`: storage root
//! - `WALLETKIT_MAINNET`: `true`/`1` to manage mainnet networks
//! - `WALLETKIT_INDEXER_URL`: indexer base URL
//! - `WALLETKIT_INDEXER_TOKEN`: indexer bearer token
//!
//! Account addresses are not part of the file. `WALLETKIT_ADDRESSES` holds a comma-separated
//! list for the managed network; an indexer only returns transactions for listed addresses.

use crate::wallet::WalletSyncError;
use crate::wallet::sync::strategies::SyncConfig;

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Duration fields serialized as whole seconds.
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Optional duration fields serialized as whole seconds.
pub(crate) mod option_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|secs| secs.map(Duration::from_secs))
    }
}

/// Settings for the Blockset-style HTTP indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub endpoint: String,
    pub token: Option<String>,
    /// Per-request timeout.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Time budget for retrying a single request.
    #[serde(with = "duration_secs")]
    pub max_retry_elapsed: Duration,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.blockset.com".to_string(),
            token: None,
            timeout: Duration::from_secs(30),
            max_retry_elapsed: Duration::from_secs(60),
        }
    }
}

/// Settings for event delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// A handler still running after this long is reported as slow. Delivery still waits for it.
    #[serde(with = "duration_secs")]
    pub slow_handler_threshold: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            slow_handler_threshold: Duration::from_secs(30),
        }
    }
}

/// Top-level configuration for a `System`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Root directory for persisted wallet data.
    pub path: PathBuf,
    /// Manage mainnet networks rather than testnets.
    pub on_mainnet: bool,
    pub sync: SyncConfig,
    pub dispatch: DispatchConfig,
    pub indexer: IndexerConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("walletkit-data"),
            on_mainnet: false,
            sync: SyncConfig::default(),
            dispatch: DispatchConfig::default(),
            indexer: IndexerConfig::default(),
        }
    }
}

impl SystemConfig {
    /// Default configuration rooted at `path`.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, WalletSyncError> {
        let content = std::fs::read_to_string(path)?;
        let config: SystemConfig = serde_json::from_str(&content)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Apply `WALLETKIT_*` environment variables on top of this configuration.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = env::var("WALLETKIT_DATA_DIR") {
            self.path = PathBuf::from(dir);
        }
        if let Ok(mainnet) = env::var("WALLETKIT_MAINNET") {
            self.on_mainnet = matches!(mainnet.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(url) = env::var("WALLETKIT_INDEXER_URL") {
            self.indexer.endpoint = url;
        }
        if let Ok(token) = env::var("WALLETKIT_INDEXER_TOKEN") {
            self.indexer.token = Some(token);
        }
        self
    }
}

/// Account addresses from `WALLETKIT_ADDRESSES`, empty when unset.
pub fn addresses_from_env() -> Vec<String> {
    env::var("WALLETKIT_ADDRESSES")
        .map(|list| parse_address_list(&list))
        .unwrap_or_default()
}

fn parse_address_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|address| !address.is_empty())
        .map(str::to_string)
        .collect()
}
