//! Time-based full flush.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use metrics::counter;
use tracing::debug;

use super::error::CacheResult;
use super::keys::CacheKey;
use super::lock::mutex_lock;
use super::traits::Cache;

const SOURCE: &str = "cache::scheduled";
const METRIC_CACHE_FLUSH: &str = "mapcache_flush_total";

/// Clears the delegate once `interval` has passed since the previous clear.
///
/// The check runs lazily on every operation; there is no background timer.
pub struct ScheduledDecorator<V> {
    delegate: Box<dyn Cache<V>>,
    interval: Duration,
    last_clear: Mutex<Instant>,
}

impl<V> ScheduledDecorator<V> {
    pub fn new(delegate: Box<dyn Cache<V>>, interval: Duration) -> Self {
        Self {
            delegate,
            interval,
            last_clear: Mutex::new(Instant::now()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn clear_when_stale(&self) -> CacheResult<bool> {
        let mut last_clear = mutex_lock(&self.last_clear, SOURCE, "clear_when_stale");
        if last_clear.elapsed() < self.interval {
            return Ok(false);
        }

        self.delegate.clear()?;
        *last_clear = Instant::now();

        debug!(
            cache_id = self.delegate.id(),
            interval_ms = self.interval.as_millis() as u64,
            "Flushed cache on schedule"
        );
        counter!(METRIC_CACHE_FLUSH, "cache" => self.delegate.id().to_owned()).increment(1);
        Ok(true)
    }
}

impl<V> Cache<V> for ScheduledDecorator<V> {
    fn id(&self) -> &str {
        self.delegate.id()
    }

    fn size(&self) -> CacheResult<usize> {
        self.clear_when_stale()?;
        self.delegate.size()
    }

    fn put(&self, key: CacheKey, value: Option<V>) -> CacheResult<()> {
        self.clear_when_stale()?;
        self.delegate.put(key, value)
    }

    fn get(&self, key: &CacheKey) -> CacheResult<Option<V>> {
        if self.clear_when_stale()? {
            return Ok(None);
        }
        self.delegate.get(key)
    }

    fn remove(&self, key: &CacheKey) -> CacheResult<Option<V>> {
        if self.clear_when_stale()? {
            return Ok(None);
        }
        self.delegate.remove(key)
    }

    fn clear(&self) -> CacheResult<()> {
        let mut last_clear = mutex_lock(&self.last_clear, SOURCE, "clear");
        self.delegate.clear()?;
        *last_clear = Instant::now();
        Ok(())
    }
}
