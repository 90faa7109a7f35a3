//! Prefix caching: memoise next-token distributions keyed by token sequence.
//!
//! Append-only: entries are never mutated or evicted. When the cache is full
//! new sequences are computed but not stored.

use super::{SequenceModel, Vocabulary};
use crate::errors::{Result, SmcError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// Memoising wrapper around any [`SequenceModel`].
pub struct CachedModel<M> {
    inner: M,
    cache: RwLock<HashMap<Vec<usize>, Arc<Vec<f32>>>>,
    max_entries: usize,
    hit_count: AtomicUsize,
    miss_count: AtomicUsize,
}

impl<M: SequenceModel> CachedModel<M> {
    pub fn new(inner: M, max_entries: usize) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            hit_count: AtomicUsize::new(0),
            miss_count: AtomicUsize::new(0),
        }
    }

    /// Get the cached distribution for `tokens`, or compute and cache it.
    pub fn get_or_compute(&self, tokens: &[usize]) -> Result<Arc<Vec<f32>>> {
        if let Some(hit) = self.read_cache()?.get(tokens) {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(hit));
        }
        self.miss_count.fetch_add(1, Ordering::Relaxed);
        let logprobs = Arc::new(self.inner.next_token_logprobs(tokens)?);
        self.insert(tokens, Arc::clone(&logprobs))?;
        Ok(logprobs)
    }

    /// Evaluate a shared prompt prefix once so every particle reads it from cache.
    pub fn prime(&self, prefix: &[usize]) -> Result<Arc<Vec<f32>>> {
        if prefix.is_empty() {
            return Err(SmcError::EmptyPrompt);
        }
        self.get_or_compute(prefix)
    }

    fn insert(&self, tokens: &[usize], logprobs: Arc<Vec<f32>>) -> Result<()> {
        let mut cache = self
            .cache
            .write()
            .map_err(|_| SmcError::ModelUnavailable("prefix cache lock poisoned".into()))?;
        if cache.len() < self.max_entries {
            cache.entry(tokens.to_vec()).or_insert(logprobs);
        }
        Ok(())
    }

    fn read_cache(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<Vec<usize>, Arc<Vec<f32>>>>> {
        self.cache
            .read()
            .map_err(|_| SmcError::ModelUnavailable("prefix cache lock poisoned".into()))
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hit_count.load(Ordering::Relaxed);
        let total = hits + self.miss_count.load(Ordering::Relaxed);
        if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        }
    }

    pub fn len(&self) -> usize {
        self.read_cache().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<M: SequenceModel> SequenceModel for CachedModel<M> {
    fn vocabulary(&self) -> &Vocabulary {
        self.inner.vocabulary()
    }

    fn next_token_logprobs(&self, tokens: &[usize]) -> Result<Vec<f32>> {
        Ok(self.get_or_compute(tokens)?.as_ref().clone())
    }

    fn next_token_logprobs_shared(&self, tokens: &[usize]) -> Result<Arc<Vec<f32>>> {
        self.get_or_compute(tokens)
    }
}
