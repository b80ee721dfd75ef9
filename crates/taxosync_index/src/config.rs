//! Configuration for the index synchronizer.

use std::time::Duration;

/// Configuration for index propagation.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Maximum number of documents per index call.
    pub batch_size: usize,
    /// Number of batches issued concurrently.
    pub parallelism: usize,
    /// Time budget of one synchronization pass. Batches not started within
    /// the budget are reported as failed.
    pub timeout: Option<Duration>,
}

impl IndexConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            batch_size: 500,
            parallelism: 4,
            timeout: Some(Duration::from_secs(300)),
        }
    }

    /// Sets the batch size (at least 1).
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Sets the number of concurrent batches (at least 1).
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Sets the time budget of a pass.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Removes the time budget.
    #[must_use]
    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self::new()
    }
}
