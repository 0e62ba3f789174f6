//! Per-key population locks.
//!
//! A lookup that misses keeps the key locked until the caller stores a value
//! with `put` (or gives up with `remove`), so concurrent callers for the same
//! key wait for that value instead of all querying the database.
//!
//! Holding locks on several keys from one flow can deadlock. Callers that
//! chain lookups must populate or release each key before the next one.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::counter;
use tracing::{trace, warn};

use super::error::{CacheError, CacheResult};
use super::keys::CacheKey;
use super::lock::{condvar_wait_while, mutex_lock};
use super::traits::Cache;

const SOURCE: &str = "cache::blocking";
const METRIC_CACHE_LOCK_TIMEOUT: &str = "mapcache_lock_timeout_total";

/// Single-use gate: closed on creation, opened exactly once.
struct Latch {
    open: Mutex<bool>,
    signal: Condvar,
}

impl Latch {
    fn new() -> Self {
        Self {
            open: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    fn open(&self) {
        *mutex_lock(&self.open, SOURCE, "latch.open") = true;
        self.signal.notify_all();
    }

    /// Returns `true` when `timeout` elapsed before the latch opened.
    fn wait(&self, timeout: Option<Duration>) -> bool {
        let guard = mutex_lock(&self.open, SOURCE, "latch.wait");
        let (_guard, timed_out) =
            condvar_wait_while(&self.signal, guard, timeout, SOURCE, |open| !*open);
        timed_out
    }
}

/// Serializes population of each key across threads.
pub struct BlockingDecorator<V> {
    delegate: Box<dyn Cache<V>>,
    timeout: Option<Duration>,
    locks: DashMap<CacheKey, Arc<Latch>>,
}

impl<V> BlockingDecorator<V> {
    /// Waiters block until the holder releases, however long that takes.
    pub fn new(delegate: Box<dyn Cache<V>>) -> Self {
        Self {
            delegate,
            timeout: None,
            locks: DashMap::new(),
        }
    }

    /// Waiters give up with `LockTimeout` after `timeout`. Zero waits forever.
    pub fn with_timeout(delegate: Box<dyn Cache<V>>, timeout: Duration) -> Self {
        Self {
            delegate,
            timeout: (!timeout.is_zero()).then_some(timeout),
            locks: DashMap::new(),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Number of keys currently locked.
    pub fn held_locks(&self) -> usize {
        self.locks.len()
    }

    fn acquire(&self, key: &CacheKey) -> CacheResult<()> {
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);

        loop {
            let latch = match self.locks.entry(key.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(Arc::new(Latch::new()));
                    trace!(cache_id = self.delegate.id(), %key, "Acquired cache key lock");
                    return Ok(());
                }
                Entry::Occupied(held) => Arc::clone(held.get()),
            };

            let remaining =
                deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
            let timed_out = match remaining {
                Some(remaining) if remaining.is_zero() => true,
                other => latch.wait(other),
            };

            if timed_out {
                return Err(self.timeout_error(key));
            }
        }
    }

    fn timeout_error(&self, key: &CacheKey) -> CacheError {
        let timeout = self.timeout.unwrap_or_default();
        warn!(
            cache_id = self.delegate.id(),
            %key,
            timeout_ms = timeout.as_millis() as u64,
            "Timed out waiting for cache key lock"
        );
        counter!(METRIC_CACHE_LOCK_TIMEOUT, "cache" => self.delegate.id().to_owned())
            .increment(1);
        CacheError::LockTimeout {
            key: key.to_string(),
            cache_id: self.delegate.id().to_owned(),
            timeout,
        }
    }

    fn release(&self, key: &CacheKey) -> CacheResult<()> {
        match self.locks.remove(key) {
            Some((_, latch)) => {
                latch.open();
                Ok(())
            }
            None => Err(CacheError::LockConsistencyViolation {
                key: key.to_string(),
                cache_id: self.delegate.id().to_owned(),
            }),
        }
    }
}

impl<V> Cache<V> for BlockingDecorator<V> {
    fn id(&self) -> &str {
        self.delegate.id()
    }

    fn size(&self) -> CacheResult<usize> {
        self.delegate.size()
    }

    /// Stores the value and always releases the key's lock.
    fn put(&self, key: CacheKey, value: Option<V>) -> CacheResult<()> {
        let written = self.delegate.put(key.clone(), value);
        self.release(&key)?;
        written
    }

    /// Locks the key; a hit releases it, a miss leaves it held for `put`.
    fn get(&self, key: &CacheKey) -> CacheResult<Option<V>> {
        self.acquire(key)?;
        match self.delegate.get(key) {
            Ok(Some(value)) => {
                self.release(key)?;
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                if let Err(release_err) = self.release(key) {
                    warn!(
                        cache_id = self.delegate.id(),
                        %key,
                        error = %release_err,
                        "Failed to release cache key lock after lookup error"
                    );
                }
                Err(err)
            }
        }
    }

    /// Releases the key's lock, if held. Never touches the delegate's data.
    fn remove(&self, key: &CacheKey) -> CacheResult<Option<V>> {
        if let Some((_, latch)) = self.locks.remove(key) {
            latch.open();
        }
        Ok(None)
    }

    fn clear(&self) -> CacheResult<()> {
        self.delegate.clear()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;

    use super::*;
    use crate::cache::store::PerpetualCache;

    fn key(name: &str) -> CacheKey {
        CacheKey::from_factors(["blocking", name])
    }

    fn blocking() -> BlockingDecorator<String> {
        BlockingDecorator::new(Box::new(
            PerpetualCache::new("blog.PostMapper").expect("valid id"),
        ))
    }

    struct FailingCache;

    impl Cache<String> for FailingCache {
        fn id(&self) -> &str {
            "failing"
        }
        fn size(&self) -> CacheResult<usize> {
            Ok(0)
        }
        fn put(&self, _key: CacheKey, _value: Option<String>) -> CacheResult<()> {
            Err(CacheError::delegate("failing", "put refused"))
        }
        fn get(&self, _key: &CacheKey) -> CacheResult<Option<String>> {
            Err(CacheError::delegate("failing", "get refused"))
        }
        fn remove(&self, _key: &CacheKey) -> CacheResult<Option<String>> {
            Ok(None)
        }
        fn clear(&self) -> CacheResult<()> {
            Ok(())
        }
    }

    #[test]
    fn miss_keeps_lock_until_put() {
        let cache = blocking();

        assert_eq!(cache.get(&key("a")).unwrap(), None);
        assert_eq!(cache.held_locks(), 1);

        cache.put(key("a"), Some("alpha".to_string())).unwrap();
        assert_eq!(cache.held_locks(), 0);

        assert_eq!(cache.get(&key("a")).unwrap(), Some("alpha".to_string()));
        assert_eq!(cache.held_locks(), 0);
    }

    #[test]
    fn remove_releases_without_touching_data() {
        let cache = blocking();
        cache.get(&key("a")).unwrap();
        cache.put(key("a"), Some("alpha".to_string())).unwrap();

        assert_eq!(cache.get(&key("b")).unwrap(), None);
        assert_eq!(cache.remove(&key("b")).unwrap(), None);
        assert_eq!(cache.held_locks(), 0);

        assert_eq!(cache.remove(&key("a")).unwrap(), None);
        assert_eq!(cache.size().unwrap(), 1);
    }

    #[test]
    fn remove_on_unlocked_key_is_not_an_error() {
        let cache = blocking();
        assert_eq!(cache.remove(&key("never")).unwrap(), None);
    }

    #[test]
    fn put_without_lock_is_a_consistency_violation() {
        let cache = blocking();

        let err = cache
            .put(key("a"), Some("alpha".to_string()))
            .expect_err("unacquired release must fail");

        assert!(err.is_fatal());
        assert!(matches!(err, CacheError::LockConsistencyViolation { .. }));
    }

    #[test]
    fn failed_put_still_releases_the_lock() {
        let cache = BlockingDecorator::new(Box::new(FailingCache));
        cache.acquire(&key("a")).unwrap();

        let err = cache.put(key("a"), None).expect_err("delegate refuses puts");

        assert!(matches!(err, CacheError::Delegate { .. }));
        assert_eq!(cache.held_locks(), 0);
    }

    #[test]
    fn failed_lookup_releases_the_lock() {
        let cache = BlockingDecorator::new(Box::new(FailingCache));

        assert!(cache.get(&key("a")).is_err());
        assert_eq!(cache.held_locks(), 0);
    }

    #[test]
    fn second_lookup_times_out_while_key_is_held() {
        let cache = BlockingDecorator::<String>::with_timeout(
            Box::new(PerpetualCache::new("blog.PostMapper").expect("valid id")),
            Duration::from_millis(20),
        );

        assert_eq!(cache.get(&key("a")).unwrap(), None);
        let err = cache.get(&key("a")).expect_err("key is still held");

        match err {
            CacheError::LockTimeout {
                cache_id, timeout, ..
            } => {
                assert_eq!(cache_id, "blog.PostMapper");
                assert_eq!(timeout, Duration::from_millis(20));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn zero_timeout_means_wait_forever() {
        let cache = BlockingDecorator::<String>::with_timeout(
            Box::new(PerpetualCache::new("blog.PostMapper").expect("valid id")),
            Duration::ZERO,
        );
        assert_eq!(cache.timeout(), None);
    }

    #[test]
    fn waiter_observes_value_after_holder_puts() {
        let cache = Arc::new(blocking());
        assert_eq!(cache.get(&key("a")).unwrap(), None);

        let (started_tx, started_rx) = mpsc::channel();
        let waiter = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                started_tx.send(()).expect("test receiver alive");
                cache.get(&key("a"))
            })
        };

        started_rx.recv().expect("waiter started");
        thread::sleep(Duration::from_millis(30));
        cache.put(key("a"), Some("alpha".to_string())).unwrap();

        let observed = waiter.join().expect("waiter thread").unwrap();
        assert_eq!(observed, Some("alpha".to_string()));
        assert_eq!(cache.held_locks(), 0);
    }

    #[test]
    fn waiter_takes_over_the_lock_after_holder_removes() {
        let cache = Arc::new(blocking());
        assert_eq!(cache.get(&key("a")).unwrap(), None);

        let (started_tx, started_rx) = mpsc::channel();
        let waiter = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                started_tx.send(()).expect("test receiver alive");
                cache.get(&key("a"))
            })
        };

        started_rx.recv().expect("waiter started");
        thread::sleep(Duration::from_millis(30));
        assert!(!waiter.is_finished());
        cache.remove(&key("a")).unwrap();

        let observed = waiter.join().expect("waiter thread").unwrap();
        assert_eq!(observed, None);
        // The waiter missed too, so it now holds the key for its own put.
        assert_eq!(cache.held_locks(), 1);
        cache.put(key("a"), Some("alpha".to_string())).unwrap();
        assert_eq!(cache.held_locks(), 0);
    }

    #[test]
    fn concurrent_misses_populate_once() {
        let cache = Arc::new(blocking());
        let loads = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let loads = Arc::clone(&loads);
                thread::spawn(move || match cache.get(&key("hot")).unwrap() {
                    Some(value) => value,
                    None => {
                        loads.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(10));
                        let value = "loaded".to_string();
                        cache.put(key("hot"), Some(value.clone())).unwrap();
                        value
                    }
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().expect("worker thread"), "loaded");
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }
}
