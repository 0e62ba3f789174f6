//! Session-scoped registry of transactional views.
//!
//! A session touches any number of shared caches during one transaction.
//! The manager hands out one [`TransactionalDecorator`] per cache id and fans
//! commit and rollback out to all of them.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, warn};

use super::error::{CacheError, CacheResult};
use super::keys::CacheKey;
use super::traits::{Cache, SharedCache};
use super::transactional::{RollbackReport, TransactionalDecorator};

/// Owned by a single session; not shared between threads.
pub struct TransactionalCacheManager<V> {
    transactional_caches: BTreeMap<String, TransactionalDecorator<V>>,
}

impl<V> TransactionalCacheManager<V>
where
    V: Send,
{
    pub fn new() -> Self {
        Self {
            transactional_caches: BTreeMap::new(),
        }
    }

    fn transactional_cache(&mut self, cache: &SharedCache<V>) -> &TransactionalDecorator<V> {
        self.transactional_caches
            .entry(cache.id().to_owned())
            .or_insert_with(|| TransactionalDecorator::new(Arc::clone(cache)))
    }

    pub fn get(&mut self, cache: &SharedCache<V>, key: &CacheKey) -> CacheResult<Option<V>> {
        self.transactional_cache(cache).get(key)
    }

    pub fn put(
        &mut self,
        cache: &SharedCache<V>,
        key: CacheKey,
        value: Option<V>,
    ) -> CacheResult<()> {
        self.transactional_cache(cache).put(key, value)
    }

    pub fn clear(&mut self, cache: &SharedCache<V>) -> CacheResult<()> {
        self.transactional_cache(cache).clear()
    }

    /// Commit every registered cache, in cache id order.
    ///
    /// An ordinary failure does not stop the others; the first one is
    /// returned once all of them have been committed. A fatal failure is
    /// returned at once and the caches after it keep their staged state, so
    /// `rollback_all` can still discard them.
    pub fn commit_all(&self) -> CacheResult<()> {
        let mut first_error: Option<CacheError> = None;
        for (cache_id, transactional) in &self.transactional_caches {
            let Err(err) = transactional.commit() else {
                continue;
            };
            if err.is_fatal() {
                error!(
                    cache_id = cache_id.as_str(),
                    error = %err,
                    "Aborting commit of remaining transactional caches"
                );
                return Err(err);
            }
            warn!(
                cache_id = cache_id.as_str(),
                error = %err,
                "Transactional cache commit failed"
            );
            first_error.get_or_insert(err);
        }

        debug!(
            caches = self.transactional_caches.len(),
            failed = first_error.is_some(),
            "Committed transactional caches"
        );
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn rollback_all(&self) -> RollbackReport {
        let mut report = RollbackReport::default();
        for transactional in self.transactional_caches.values() {
            report.merge(transactional.rollback());
        }
        report
    }

    /// Number of caches touched by this session.
    pub fn len(&self) -> usize {
        self.transactional_caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactional_caches.is_empty()
    }
}

impl<V> Default for TransactionalCacheManager<V>
where
    V: Send,
{
    fn default() -> Self {
        Self::new()
    }
}
