//!
//! HTTP client for Blockset-style blockchain indexers.
//!
//! This module provides an async client that answers the `BlockchainQuery` calls made by wallet
//! managers: the current block height of a blockchain and the raw transactions touching a set of
//! addresses. Transient failures are retried with exponential backoff.

use super::BlockchainQuery;
use super::types::*;
use crate::config::IndexerConfig;

use backoff::{ExponentialBackoff, future::retry};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Address lists are split so each request stays under this many characters of addresses.
const ADDRESS_BUCKET_CHARS: usize = 1500;

/// Blockset indexer client
#[derive(Clone)]
pub struct BlocksetClient {
	/// The underlying HTTP client.
	http_client: Client,
	/// Base URL of the indexer API.
	endpoint: String,
	/// Optional bearer token.
	token: Option<String>,
	/// Upper bound on the time spent retrying one request.
	max_retry_elapsed: Duration,
}

#[derive(Debug, Deserialize)]
struct BlockchainResponse {
	block_height: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TransactionsPage {
	#[serde(rename = "_embedded", default)]
	embedded: Option<EmbeddedTransactions>,
	#[serde(rename = "_links", default)]
	links: Option<PageLinks>,
}

#[derive(Debug, Deserialize)]
struct EmbeddedTransactions {
	#[serde(default)]
	transactions: Vec<BlocksetTransaction>,
}

#[derive(Debug, Deserialize)]
struct PageLinks {
	next: Option<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
	href: String,
}

#[derive(Debug, Deserialize)]
struct BlocksetTransaction {
	hash: Option<String>,
	status: String,
	timestamp: Option<String>,
	block_height: Option<u64>,
	raw: Option<String>,
	#[serde(default)]
	transfers: Vec<BlocksetTransfer>,
}

#[derive(Debug, Deserialize)]
struct BlocksetTransfer {
	currency_id: String,
}

impl BlocksetTransaction {
	/// Convert to a `RawTransaction`; transactions without a raw payload are skipped.
	fn into_raw(self, blockchain_id: &str) -> Result<Option<RawTransaction>, IndexerError> {
		let Some(raw) = self.raw else {
			debug!("Transaction {:?} has no raw data, skipping", self.hash);
			return Ok(None);
		};

		let data = BASE64
			.decode(raw.as_bytes())
			.map_err(|e| IndexerError::DecodeError(format!("Invalid base64 payload: {}", e)))?;

		let timestamp = match self.timestamp {
			Some(ts) => Some(
				chrono::DateTime::parse_from_rfc3339(&ts)
					.map_err(|e| IndexerError::DecodeError(format!("Invalid timestamp {}: {}", ts, e)))?
					.timestamp()
					.max(0) as u64,
			),
			None => None,
		};

		let currency_uids = self
			.transfers
			.into_iter()
			.next()
			.map(|transfer| transfer.currency_id)
			.unwrap_or_else(|| format!("{}:__native__", blockchain_id));

		Ok(Some(RawTransaction {
			currency_uids,
			status: TransactionStatus::from_indexer(&self.status),
			block_height: self.block_height,
			timestamp,
			data,
		}))
	}
}

/// Split addresses into request-sized buckets.
fn bucket_addresses(addresses: &[String]) -> Vec<Vec<String>> {
	let mut buckets: Vec<Vec<String>> = vec![Vec::new()];
	let mut bucket_chars = 0usize;

	for address in addresses {
		bucket_chars += address.len();
		if bucket_chars > ADDRESS_BUCKET_CHARS {
			buckets.push(Vec::new());
			bucket_chars = address.len();
		}
		if let Some(bucket) = buckets.last_mut() {
			bucket.push(address.clone());
		}
	}

	buckets
}

fn classify(error: IndexerError) -> backoff::Error<IndexerError> {
	if error.is_transient() {
		warn!("Transient indexer error, retrying: {}", error);
		backoff::Error::transient(error)
	} else {
		backoff::Error::permanent(error)
	}
}

impl BlocksetClient {
	/// Create a new indexer client.
	///
	/// # Arguments
	/// * `endpoint` - Base URL of the indexer API.
	/// * `token` - Optional bearer token sent with every request.
	/// * `timeout` - Per-request timeout.
	/// * `max_retry_elapsed` - Total time budget for retrying one request.
	pub fn new(
		endpoint: String,
		token: Option<String>,
		timeout: Duration,
		max_retry_elapsed: Duration,
	) -> Result<Self, IndexerError> {
		let http_client = Client::builder().timeout(timeout).build()?;

		Ok(Self {
			http_client,
			endpoint: endpoint.trim_end_matches('/').to_string(),
			token,
			max_retry_elapsed,
		})
	}

	pub fn from_config(config: &IndexerConfig) -> Result<Self, IndexerError> {
		Self::new(
			config.endpoint.clone(),
			config.token.clone(),
			config.timeout,
			config.max_retry_elapsed,
		)
	}

	/// GET `url` and decode the JSON body, retrying transient failures.
	async fn get_json<T: DeserializeOwned>(
		&self,
		url: &str,
		query: &[(&str, String)],
	) -> Result<T, IndexerError> {
		let policy = ExponentialBackoff {
			max_elapsed_time: Some(self.max_retry_elapsed),
			..ExponentialBackoff::default()
		};

		retry(policy, || async {
			let mut request = self
				.http_client
				.get(url)
				.query(query)
				.header("accept", "application/json");
			if let Some(token) = &self.token {
				request = request.bearer_auth(token);
			}

			let response = request
				.send()
				.await
				.map_err(|e| classify(IndexerError::from(e)))?;
			let status = response.status();
			let body = response
				.text()
				.await
				.map_err(|e| classify(IndexerError::from(e)))?;

			if !status.is_success() {
				return Err(classify(IndexerError::Status {
					status: status.as_u16(),
					body,
				}));
			}

			serde_json::from_str::<T>(&body)
				.map_err(|e| backoff::Error::permanent(IndexerError::from(e)))
		})
		.await
	}

	/// Fetch every page of transactions for one address bucket.
	async fn get_transactions_bucket(
		&self,
		blockchain_id: &str,
		addresses: &[String],
		start_block_height: u64,
		end_block_height: u64,
	) -> Result<Vec<RawTransaction>, IndexerError> {
		let mut query: Vec<(&str, String)> = vec![
			("blockchain_id", blockchain_id.to_string()),
			("start_height", start_block_height.to_string()),
			("end_height", end_block_height.to_string()),
			("include_raw", "true".to_string()),
		];
		query.extend(addresses.iter().map(|address| ("address", address.clone())));

		let mut transactions = Vec::new();
		let mut page: TransactionsPage = self
			.get_json(&format!("{}/transactions", self.endpoint), &query)
			.await?;

		loop {
			if let Some(embedded) = page.embedded.take() {
				for tx in embedded.transactions {
					if let Some(raw) = tx.into_raw(blockchain_id)? {
						transactions.push(raw);
					}
				}
			}

			match page.links.take().and_then(|links| links.next) {
				Some(next) => {
					debug!("Following transactions page link {}", next.href);
					page = self.get_json(&next.href, &[]).await?;
				}
				None => break,
			}
		}

		Ok(transactions)
	}
}

#[async_trait::async_trait]
impl BlockchainQuery for BlocksetClient {
	async fn get_block_height(&self, blockchain_id: &str) -> Result<u64, IndexerError> {
		debug!("get_block_height blockchain_id={}", blockchain_id);

		let blockchain: BlockchainResponse = self
			.get_json(&format!("{}/blockchains/{}", self.endpoint, blockchain_id), &[])
			.await?;
		let height = blockchain.block_height.ok_or(IndexerError::NoData)?;

		debug!(
			"get_block_height completed blockchain_id={} block_height={}",
			blockchain_id, height
		);
		Ok(height)
	}

	async fn get_raw_transactions(
		&self,
		blockchain_id: &str,
		addresses: &[String],
		start_block_height: u64,
		end_block_height: u64,
	) -> Result<Vec<RawTransaction>, IndexerError> {
		let buckets = bucket_addresses(addresses);
		info!(
			"get_raw_transactions blockchain_id={} addresses={} start={} end={} requests={}",
			blockchain_id,
			addresses.len(),
			start_block_height,
			end_block_height,
			buckets.len()
		);

		let mut transactions = Vec::new();
		for bucket in buckets.iter().filter(|bucket| !bucket.is_empty()) {
			let page = self
				.get_transactions_bucket(blockchain_id, bucket, start_block_height, end_block_height)
				.await?;
			transactions.extend(page);
		}

		info!(
			"get_raw_transactions finished blockchain_id={} tx_count={}",
			blockchain_id,
			transactions.len()
		);
		Ok(transactions)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn addresses_split_into_buckets() {
		let addresses: Vec<String> = (0..100).map(|i| format!("{:0>40}", i)).collect();
		let buckets = bucket_addresses(&addresses);

		assert!(buckets.len() > 1);
		assert_eq!(100, buckets.iter().map(Vec::len).sum::<usize>());
		for bucket in &buckets {
			assert!(bucket.iter().map(String::len).sum::<usize>() <= ADDRESS_BUCKET_CHARS);
		}
	}

	#[test]
	fn blockset_transaction_decodes() {
		let json = r#"{
			"hash": "abcd",
			"status": "confirmed",
			"timestamp": "2019-05-01T10:00:00Z",
			"block_height": 1500000,
			"raw": "AAEC",
			"transfers": [{"currency_id": "bitcoin-testnet:__native__"}]
		}"#;
		let tx: BlocksetTransaction = serde_json::from_str(json).unwrap();
		let raw = tx.into_raw("bitcoin-testnet").unwrap().unwrap();

		assert_eq!(vec![0u8, 1, 2], raw.data);
		assert_eq!(TransactionStatus::Confirmed, raw.status);
		assert_eq!(Some(1_500_000), raw.block_height);
		assert_eq!(Some(1_556_704_800), raw.timestamp);
		assert_eq!("bitcoin-testnet:__native__", raw.currency_uids);
	}

	#[test]
	fn transaction_without_raw_is_skipped() {
		let json = r#"{"hash": "abcd", "status": "pending"}"#;
		let tx: BlocksetTransaction = serde_json::from_str(json).unwrap();
		assert!(tx.into_raw("bitcoin-testnet").unwrap().is_none());
	}
}
