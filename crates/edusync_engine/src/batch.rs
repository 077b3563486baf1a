//! Concurrent batch execution with per-item outcomes.
//!
//! Unlike a fail-fast join, [`BatchExecutor::run_all`] waits for every
//! item to settle and reports each one. A failure on one row never
//! abandons the others.

use crate::error::RemoteError;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::future::Future;
use tracing::{debug, warn};

/// Outcome of a batch: every input lands in exactly one of the two lists.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult<I, O, E = RemoteError> {
    /// Inputs whose operation succeeded, with the response.
    pub succeeded: Vec<(I, O)>,
    /// Inputs whose operation failed, with the error.
    pub failed: Vec<(I, E)>,
}

impl<I, O, E> BatchResult<I, O, E> {
    /// Creates an empty result.
    pub fn new() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Returns the number of inputs covered.
    pub fn len(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// Returns true if the batch had no inputs.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if every item succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    /// Returns true if some, but not all, items failed.
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty() && !self.succeeded.is_empty()
    }

    /// Returns the inputs that succeeded.
    pub fn succeeded_inputs(&self) -> impl Iterator<Item = &I> {
        self.succeeded.iter().map(|(input, _)| input)
    }

    /// Returns the inputs that failed.
    pub fn failed_inputs(&self) -> impl Iterator<Item = &I> {
        self.failed.iter().map(|(input, _)| input)
    }

    /// Sorts outcomes into a result, preserving input order within each list.
    pub fn from_outcomes<It>(outcomes: It) -> Self
    where
        It: IntoIterator<Item = (I, Result<O, E>)>,
    {
        let mut result = Self::new();
        for (input, outcome) in outcomes {
            match outcome {
                Ok(output) => result.succeeded.push((input, output)),
                Err(err) => result.failed.push((input, err)),
            }
        }
        result
    }
}

impl<I, O, E> Default for BatchResult<I, O, E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs independent remote operations concurrently.
///
/// No retries: each item gets exactly one attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchExecutor {
    max_concurrency: Option<usize>,
}

impl BatchExecutor {
    /// Creates an executor with unbounded concurrency.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an executor issuing at most `limit` operations at a time.
    pub fn with_max_concurrency(limit: usize) -> Self {
        Self {
            max_concurrency: Some(limit.max(1)),
        }
    }

    /// Creates an executor from an optional limit.
    pub fn bounded(limit: Option<usize>) -> Self {
        limit.map_or_else(Self::new, Self::with_max_concurrency)
    }

    /// Returns the concurrency limit.
    pub fn max_concurrency(&self) -> Option<usize> {
        self.max_concurrency
    }

    /// Runs `op` for every item and waits for all of them to settle.
    ///
    /// Never short-circuits. Each input is reported once, in input order
    /// within the succeeded and failed lists.
    pub async fn run_all<I, O, E, F, Fut>(&self, items: Vec<I>, op: F) -> BatchResult<I, O, E>
    where
        I: Clone,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<O, E>>,
    {
        let total = items.len();
        let tasks = items.into_iter().map(|item| {
            let fut = op(item.clone());
            async move { (item, fut.await) }
        });

        let outcomes = match self.max_concurrency {
            Some(limit) => stream::iter(tasks).buffered(limit).collect::<Vec<_>>().await,
            None => join_all(tasks).await,
        };

        let result = BatchResult::from_outcomes(outcomes);
        if result.all_succeeded() {
            debug!(total, "batch completed");
        } else {
            warn!(
                total,
                succeeded = result.succeeded.len(),
                failed = result.failed.len(),
                "batch completed with failures"
            );
        }
        result
    }
}
