//! Progress tracking for wallet synchronization.
//!
//! `SyncProgressTracker` follows one sync pass over a block range. Strategies record the heights
//! they have covered and the transactions they found; the tracker turns that into a completion
//! percentage, throttled progress reports and a summary once the pass is done.

use tracing::info;

/// Service for tracking synchronization progress over `[start_height, end_height]`.
#[derive(Debug, Clone)]
pub struct SyncProgressTracker {
    /// First height of this pass
    start_height: u64,
    /// Chain tip when the pass started
    end_height: u64,
    /// The highest height we've processed
    highest_processed_height: u64,
    /// Track if any range has been covered yet
    has_processed_data: bool,
    /// Total transactions received from the network
    transactions_processed: usize,
    /// Transactions that were new or changed transfers
    transfers_updated: usize,
    /// Percentage at which we last reported progress
    last_reported_percent: f32,
    /// Minimum percentage increase between two reports
    step_percent: f32,
}

impl SyncProgressTracker {
    pub fn new(start_height: u64, end_height: u64, step_percent: f32) -> Self {
        Self {
            start_height,
            end_height: end_height.max(start_height),
            highest_processed_height: start_height,
            has_processed_data: false,
            transactions_processed: 0,
            transfers_updated: 0,
            last_reported_percent: 0.0,
            step_percent: step_percent.max(f32::EPSILON),
        }
    }

    pub fn start_height(&self) -> u64 {
        self.start_height
    }

    pub fn end_height(&self) -> u64 {
        self.end_height
    }

    /// Record that every block up to `height` has been covered
    pub fn record_processed(&mut self, height: u64) {
        self.highest_processed_height = self.highest_processed_height.max(height.min(self.end_height));
        self.has_processed_data = true;
    }

    /// Record transactions received from the network
    pub fn record_transactions(&mut self, count: usize) {
        self.transactions_processed += count;
    }

    /// Record transfers that were added or changed
    pub fn record_transfers_updated(&mut self, count: usize) {
        self.transfers_updated += count;
    }

    pub fn percent_complete(&self) -> f32 {
        if !self.has_processed_data {
            return 0.0;
        }
        let span = self.end_height - self.start_height;
        if span == 0 {
            return 100.0;
        }
        let done = self.highest_processed_height - self.start_height;
        (done as f32 / span as f32 * 100.0).clamp(0.0, 100.0)
    }

    /// The current percentage, if it moved at least one step since the last report.
    pub fn take_progress_report(&mut self) -> Option<f32> {
        let percent = self.percent_complete();
        if percent - self.last_reported_percent >= self.step_percent
            || (percent >= 100.0 && self.last_reported_percent < 100.0)
        {
            self.last_reported_percent = percent;
            return Some(percent);
        }
        None
    }

    pub fn log_progress(&self) {
        info!(
            "Sync progress: {:.0}% ({} of {} blocks), {} transactions",
            self.percent_complete(),
            self.highest_processed_height - self.start_height,
            self.end_height - self.start_height,
            self.transactions_processed
        );
    }

    /// Get sync statistics as a SyncStats struct
    pub fn get_stats(&self) -> SyncStats {
        SyncStats {
            start_height: self.start_height,
            end_height: self.end_height,
            highest_processed_height: self.highest_processed_height,
            transactions_processed: self.transactions_processed,
            transfers_updated: self.transfers_updated,
        }
    }

    /// Validate that the whole range was covered
    pub fn validate_completion(&self) -> Result<(), String> {
        if self.end_height > self.start_height && self.highest_processed_height < self.end_height {
            return Err(format!(
                "Sync stopped at block {} of {}",
                self.highest_processed_height, self.end_height
            ));
        }
        Ok(())
    }
}

/// Statistics about one sync pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub start_height: u64,
    pub end_height: u64,
    pub highest_processed_height: u64,
    pub transactions_processed: usize,
    pub transfers_updated: usize,
}

impl SyncStats {
    /// Get a human-readable summary of the sync statistics
    pub fn summary(&self) -> String {
        format!(
            "Sync from {} to {}: {} transactions, {} transfers updated",
            self.start_height,
            self.highest_processed_height,
            self.transactions_processed,
            self.transfers_updated
        )
    }
}
