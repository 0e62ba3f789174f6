//! Capacity-bounded decorators.
//!
//! Both keep a private key ledger next to the delegate. When the ledger
//! outgrows its capacity, the victim key is removed from the delegate, not
//! only from the ledger.

use std::collections::{HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::sync::Mutex;

use ::lru::LruCache;
use metrics::counter;
use tracing::debug;

use super::error::CacheResult;
use super::keys::CacheKey;
use super::lock::mutex_lock;
use super::traits::Cache;

const SOURCE: &str = "cache::eviction";
const METRIC_CACHE_EVICT: &str = "mapcache_evict_total";

/// Default number of keys tracked before eviction starts.
pub const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1024) {
    Some(capacity) => capacity,
    None => NonZeroUsize::MIN,
};

fn record_eviction(cache_id: &str, key: &CacheKey, policy: &'static str) {
    debug!(cache_id, %key, policy, "Evicting cache entry");
    counter!(METRIC_CACHE_EVICT, "cache" => cache_id.to_owned(), "policy" => policy).increment(1);
}

// ============================================================================
// LRU
// ============================================================================

/// Least-recently-used eviction over any delegate.
///
/// Both `put` and `get` mark the key as most recently used.
pub struct LruDecorator<V> {
    delegate: Box<dyn Cache<V>>,
    ledger: Mutex<LruCache<CacheKey, ()>>,
}

impl<V> LruDecorator<V> {
    pub fn new(delegate: Box<dyn Cache<V>>) -> Self {
        Self::with_capacity(delegate, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(delegate: Box<dyn Cache<V>>, capacity: NonZeroUsize) -> Self {
        Self {
            delegate,
            ledger: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn capacity(&self) -> NonZeroUsize {
        mutex_lock(&self.ledger, SOURCE, "lru.capacity").cap()
    }

    /// Change the capacity, evicting the least recently used surplus.
    pub fn resize(&self, capacity: NonZeroUsize) -> CacheResult<()> {
        let mut surplus = Vec::new();
        {
            let mut ledger = mutex_lock(&self.ledger, SOURCE, "lru.resize");
            while ledger.len() > capacity.get() {
                match ledger.pop_lru() {
                    Some((key, ())) => surplus.push(key),
                    None => break,
                }
            }
            ledger.resize(capacity);
        }

        for key in surplus {
            record_eviction(self.delegate.id(), &key, "lru");
            self.delegate.remove(&key)?;
        }
        Ok(())
    }
}

impl<V> Cache<V> for LruDecorator<V>
where
    V: Send + Sync,
{
    fn id(&self) -> &str {
        self.delegate.id()
    }

    fn size(&self) -> CacheResult<usize> {
        self.delegate.size()
    }

    fn put(&self, key: CacheKey, value: Option<V>) -> CacheResult<()> {
        self.delegate.put(key.clone(), value)?;

        let eldest = {
            let mut ledger = mutex_lock(&self.ledger, SOURCE, "lru.put");
            // `push` hands back the same key when it was already tracked.
            match ledger.push(key.clone(), ()) {
                Some((evicted, ())) if evicted != key => Some(evicted),
                _ => None,
            }
        };

        if let Some(eldest) = eldest {
            record_eviction(self.delegate.id(), &eldest, "lru");
            self.delegate.remove(&eldest)?;
        }
        Ok(())
    }

    fn get(&self, key: &CacheKey) -> CacheResult<Option<V>> {
        mutex_lock(&self.ledger, SOURCE, "lru.get").promote(key);
        self.delegate.get(key)
    }

    fn remove(&self, key: &CacheKey) -> CacheResult<Option<V>> {
        self.delegate.remove(key)
    }

    fn clear(&self) -> CacheResult<()> {
        self.delegate.clear()?;
        mutex_lock(&self.ledger, SOURCE, "lru.clear").clear();
        Ok(())
    }
}

// ============================================================================
// FIFO
// ============================================================================

#[derive(Default)]
struct FifoLedger {
    order: VecDeque<CacheKey>,
    members: HashSet<CacheKey>,
}

/// First-in-first-out eviction over any delegate.
///
/// Reads never reorder the ledger and re-putting a tracked key keeps its
/// original position.
pub struct FifoDecorator<V> {
    delegate: Box<dyn Cache<V>>,
    capacity: NonZeroUsize,
    ledger: Mutex<FifoLedger>,
}

impl<V> FifoDecorator<V> {
    pub fn new(delegate: Box<dyn Cache<V>>) -> Self {
        Self::with_capacity(delegate, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(delegate: Box<dyn Cache<V>>, capacity: NonZeroUsize) -> Self {
        Self {
            delegate,
            capacity,
            ledger: Mutex::new(FifoLedger::default()),
        }
    }

    pub fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }
}

impl<V> Cache<V> for FifoDecorator<V>
where
    V: Send + Sync,
{
    fn id(&self) -> &str {
        self.delegate.id()
    }

    fn size(&self) -> CacheResult<usize> {
        self.delegate.size()
    }

    fn put(&self, key: CacheKey, value: Option<V>) -> CacheResult<()> {
        self.delegate.put(key.clone(), value)?;

        let oldest = {
            let mut ledger = mutex_lock(&self.ledger, SOURCE, "fifo.put");
            if ledger.members.insert(key.clone()) {
                ledger.order.push_back(key);
            }
            if ledger.order.len() > self.capacity.get() {
                let oldest = ledger.order.pop_front();
                if let Some(oldest) = oldest.as_ref() {
                    ledger.members.remove(oldest);
                }
                oldest
            } else {
                None
            }
        };

        if let Some(oldest) = oldest {
            record_eviction(self.delegate.id(), &oldest, "fifo");
            self.delegate.remove(&oldest)?;
        }
        Ok(())
    }

    fn get(&self, key: &CacheKey) -> CacheResult<Option<V>> {
        self.delegate.get(key)
    }

    fn remove(&self, key: &CacheKey) -> CacheResult<Option<V>> {
        self.delegate.remove(key)
    }

    fn clear(&self) -> CacheResult<()> {
        self.delegate.clear()?;
        let mut ledger = mutex_lock(&self.ledger, SOURCE, "fifo.clear");
        ledger.order.clear();
        ledger.members.clear();
        Ok(())
    }
}
