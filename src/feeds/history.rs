use super::cache::TtlCache;
use crate::errors::{EngineError, EngineResult};
use std::sync::Mutex;
use std::time::Duration;

/// Daily closing prices per symbol, supplied by the market-data collaborator.
///
/// Symbols are normalised to upper case. Entries expire after the TTL so a
/// stale series is never blended into a fresh request.
pub struct HistoryStore {
    cache: Mutex<TtlCache<String, Vec<f64>>>,
}

impl HistoryStore {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(TtlCache::new(capacity, ttl)),
        }
    }

    fn key(symbol: &str) -> String {
        symbol.trim().to_ascii_uppercase()
    }

    pub fn put(&self, symbol: &str, closes: Vec<f64>) -> EngineResult<()> {
        let key = Self::key(symbol);
        if key.is_empty() {
            return Err(EngineError::InvalidInput("symbol must not be empty".into()));
        }
        let len = closes.len();
        self.cache
            .lock()
            .map_err(|_| EngineError::Computation("history cache lock poisoned".into()))?
            .insert(key.clone(), closes);
        tracing::debug!(symbol = %key, closes = len, "history cached");
        Ok(())
    }

    /// Cached closes for `symbol`, or `None` when absent, expired or the
    /// cache is unusable. A miss is a degraded path, not an error.
    pub fn get(&self, symbol: &str) -> Option<Vec<f64>> {
        let key = Self::key(symbol);
        match self.cache.lock() {
            Ok(mut cache) => cache.get(&key),
            Err(_) => {
                tracing::warn!(symbol = %key, "history cache lock poisoned");
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }
}
