//! In-memory chain implementing `BlockchainQuery`.
//!
//! Every stored transaction is treated as belonging to the queried account, so address lists are
//! ignored. Latency and transient failures can be injected to exercise the sync state machine.

use super::BlockchainQuery;
use super::types::*;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Default)]
struct ChainData {
    height: u64,
    transactions: Vec<RawTransaction>,
}

#[derive(Debug, Default)]
struct MemoryChainState {
    chains: HashMap<String, ChainData>,
    failures_remaining: u32,
    latency: Duration,
}

/// Shared handle to an in-memory set of chains.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlockchain {
    state: Arc<Mutex<MemoryChainState>>,
}

impl MemoryBlockchain {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the tip height of a chain, creating the chain if needed.
    pub fn set_height(&self, blockchain_id: &str, height: u64) {
        self.lock()
            .chains
            .entry(blockchain_id.to_string())
            .or_default()
            .height = height;
    }

    /// Append a transaction. The tip advances to the transaction's block if it is higher.
    pub fn add_transaction(&self, blockchain_id: &str, transaction: RawTransaction) {
        let mut state = self.lock();
        let chain = state.chains.entry(blockchain_id.to_string()).or_default();
        if let Some(height) = transaction.block_height {
            chain.height = chain.height.max(height);
        }
        chain.transactions.push(transaction);
    }

    /// Mark every transaction carrying `data` as confirmed at `block_height`.
    pub fn confirm_transaction(
        &self,
        blockchain_id: &str,
        data: &[u8],
        block_height: u64,
        timestamp: u64,
    ) -> bool {
        let mut state = self.lock();
        let Some(chain) = state.chains.get_mut(blockchain_id) else {
            return false;
        };

        let mut found = false;
        for transaction in chain.transactions.iter_mut().filter(|tx| tx.data == data) {
            transaction.status = TransactionStatus::Confirmed;
            transaction.block_height = Some(block_height);
            transaction.timestamp = Some(timestamp);
            found = true;
        }
        chain.height = chain.height.max(block_height);
        found
    }

    /// Make the next `count` requests fail with `IndexerError::Unavailable`.
    pub fn fail_next_requests(&self, count: u32) {
        self.lock().failures_remaining = count;
    }

    /// Delay every request by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    pub fn transactions(&self, blockchain_id: &str) -> Vec<RawTransaction> {
        self.lock()
            .chains
            .get(blockchain_id)
            .map(|chain| chain.transactions.clone())
            .unwrap_or_default()
    }

    /// Apply injected latency and failures ahead of a request.
    async fn before_request(&self) -> Result<(), IndexerError> {
        let latency = self.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(IndexerError::Unavailable(
                "injected failure from in-memory chain".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl BlockchainQuery for MemoryBlockchain {
    async fn get_block_height(&self, blockchain_id: &str) -> Result<u64, IndexerError> {
        self.before_request().await?;

        self.lock()
            .chains
            .get(blockchain_id)
            .map(|chain| chain.height)
            .ok_or_else(|| IndexerError::UnknownBlockchain(blockchain_id.to_string()))
    }

    async fn get_raw_transactions(
        &self,
        blockchain_id: &str,
        _addresses: &[String],
        start_block_height: u64,
        end_block_height: u64,
    ) -> Result<Vec<RawTransaction>, IndexerError> {
        self.before_request().await?;

        let state = self.lock();
        let chain = state
            .chains
            .get(blockchain_id)
            .ok_or_else(|| IndexerError::UnknownBlockchain(blockchain_id.to_string()))?;

        let reaches_tip = end_block_height >= chain.height;
        let transactions: Vec<RawTransaction> = chain
            .transactions
            .iter()
            .filter(|tx| match tx.block_height {
                Some(height) => (start_block_height..=end_block_height).contains(&height),
                None => reaches_tip,
            })
            .cloned()
            .collect();

        debug!(
            "In-memory chain {} returned {} transactions for [{}, {}]",
            blockchain_id,
            transactions.len(),
            start_block_height,
            end_block_height
        );
        Ok(transactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(data: u8, block_height: Option<u64>) -> RawTransaction {
        RawTransaction {
            currency_uids: "bitcoin-testnet:__native__".to_string(),
            status: if block_height.is_some() {
                TransactionStatus::Confirmed
            } else {
                TransactionStatus::Pending
            },
            block_height,
            timestamp: block_height.map(|h| h * 600),
            data: vec![data],
        }
    }

    #[tokio::test]
    async fn range_query_includes_pending_only_at_tip() {
        let chain = MemoryBlockchain::new();
        chain.add_transaction("btc", tx(1, Some(10)));
        chain.add_transaction("btc", tx(2, Some(20)));
        chain.add_transaction("btc", tx(3, None));

        let early = chain.get_raw_transactions("btc", &[], 0, 15).await.unwrap();
        assert_eq!(1, early.len());

        let all = chain.get_raw_transactions("btc", &[], 0, 20).await.unwrap();
        assert_eq!(3, all.len());
        assert_eq!(20, chain.get_block_height("btc").await.unwrap());
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let chain = MemoryBlockchain::new();
        chain.set_height("btc", 5);
        chain.fail_next_requests(1);

        assert!(chain.get_block_height("btc").await.is_err());
        assert_eq!(5, chain.get_block_height("btc").await.unwrap());
        assert!(matches!(
            chain.get_block_height("eth").await,
            Err(IndexerError::UnknownBlockchain(_))
        ));
    }
}
