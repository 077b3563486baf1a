//! Configuration for the sync engine.

use crate::batch::BatchExecutor;
use std::time::Duration;

/// How a multi-record read-state change reaches the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadBatchMode {
    /// One call per record; only the records whose call failed roll back.
    #[default]
    PerItem,
    /// One bulk call; any failure rolls back the whole set.
    BulkEndpoint,
}

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the REST API.
    pub base_url: String,
    /// Delay between the end of one poll and the start of the next.
    pub poll_interval: Duration,
    /// Per-call timeout applied by the REST adapter.
    pub request_timeout: Option<Duration>,
    /// Upper bound on concurrent calls issued by one batch.
    pub max_concurrency: Option<usize>,
    /// Strategy for mark-all-as-read.
    pub read_batch_mode: ReadBatchMode,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            poll_interval: Duration::from_secs(30),
            request_timeout: None,
            max_concurrency: None,
            read_batch_mode: ReadBatchMode::default(),
        }
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Caps the number of concurrent calls per batch.
    ///
    /// Zero is treated as one.
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    /// Sets the mark-all-as-read strategy.
    pub fn with_read_batch_mode(mut self, mode: ReadBatchMode) -> Self {
        self.read_batch_mode = mode;
        self
    }

    /// Builds a batch executor honoring `max_concurrency`.
    pub fn executor(&self) -> BatchExecutor {
        BatchExecutor::bounded(self.max_concurrency)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("")
    }
}
