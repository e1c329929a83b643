//! Result memoisation over an inner calculator.

use crate::calc::{CalcError, Calculator};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Caches every `input → result` pair for the lifetime of the seed's worker.
///
/// Cache hits are served without touching the inner deduplicator. The memo
/// is unbounded; it lives exactly as long as the seed's pipeline.
// TODO: bound the memo with an LRU once per-seed input sets grow past memory.
pub struct CachedCalculator {
    inner: Arc<dyn Calculator>,
    results: RwLock<HashMap<u64, i64>>,
}

impl CachedCalculator {
    /// Wraps `inner` with a fresh, empty memo.
    pub fn new(inner: Arc<dyn Calculator>) -> Self {
        Self {
            inner,
            results: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the number of memoised results.
    pub fn len(&self) -> usize {
        self.results.read().unwrap().len()
    }

    /// Returns true if nothing is memoised yet.
    pub fn is_empty(&self) -> bool {
        self.results.read().unwrap().is_empty()
    }
}

#[async_trait]
impl Calculator for CachedCalculator {
    async fn calculate(&self, cancel: &CancellationToken, input: u64) -> Result<i64, CalcError> {
        let cached = self.results.read().unwrap().get(&input).copied();
        if let Some(value) = cached {
            debug!(input, value, "got result from cache");
            return Ok(value);
        }

        let value = self.inner.calculate(cancel, input).await?;

        // Last writer wins: the backend is a pure function, so concurrent
        // misses insert the same value.
        self.results.write().unwrap().insert(input, value);
        debug!(input, value, "saved result to cache");
        Ok(value)
    }

    async fn close(&self) -> Result<(), CalcError> {
        self.inner.close().await
    }
}
