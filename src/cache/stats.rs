//! Hit/miss accounting.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use tracing::debug;

use super::error::CacheResult;
use super::keys::CacheKey;
use super::traits::Cache;

const METRIC_CACHE_HIT: &str = "mapcache_hit_total";
const METRIC_CACHE_MISS: &str = "mapcache_miss_total";

/// Counts lookups and hits and reports the running hit ratio.
pub struct StatsDecorator<V> {
    delegate: Box<dyn Cache<V>>,
    requests: AtomicU64,
    hits: AtomicU64,
}

impl<V> StatsDecorator<V> {
    pub fn new(delegate: Box<dyn Cache<V>>) -> Self {
        Self {
            delegate,
            requests: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Hits over requests, 0.0 before the first lookup.
    pub fn hit_ratio(&self) -> f64 {
        let requests = self.requests();
        if requests == 0 {
            0.0
        } else {
            self.hits() as f64 / requests as f64
        }
    }
}

impl<V> Cache<V> for StatsDecorator<V> {
    fn id(&self) -> &str {
        self.delegate.id()
    }

    fn size(&self) -> CacheResult<usize> {
        self.delegate.size()
    }

    fn put(&self, key: CacheKey, value: Option<V>) -> CacheResult<()> {
        self.delegate.put(key, value)
    }

    fn get(&self, key: &CacheKey) -> CacheResult<Option<V>> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let value = self.delegate.get(key)?;

        let cache_id = self.delegate.id().to_owned();
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            counter!(METRIC_CACHE_HIT, "cache" => cache_id).increment(1);
        } else {
            counter!(METRIC_CACHE_MISS, "cache" => cache_id).increment(1);
        }

        debug!(
            cache_id = self.delegate.id(),
            hit_ratio = self.hit_ratio(),
            "Cache hit ratio"
        );
        Ok(value)
    }

    fn remove(&self, key: &CacheKey) -> CacheResult<Option<V>> {
        self.delegate.remove(key)
    }

    fn clear(&self) -> CacheResult<()> {
        self.delegate.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::PerpetualCache;

    #[test]
    fn hit_ratio_tracks_lookups() {
        let cache = StatsDecorator::<&'static str>::new(Box::new(
            PerpetualCache::new("stats").expect("valid id"),
        ));
        let key = CacheKey::from_factors(["post", "1"]);

        assert_eq!(cache.hit_ratio(), 0.0);

        assert_eq!(cache.get(&key).unwrap(), None);
        cache.put(key.clone(), Some("cached")).unwrap();
        assert_eq!(cache.get(&key).unwrap(), Some("cached"));
        assert_eq!(cache.get(&key).unwrap(), Some("cached"));
        cache.get(&CacheKey::from_factors(["post", "2"])).unwrap();

        assert_eq!(cache.requests(), 4);
        assert_eq!(cache.hits(), 2);
        assert!((cache.hit_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn cached_miss_counts_as_miss() {
        let cache =
            StatsDecorator::<u8>::new(Box::new(PerpetualCache::new("stats").expect("valid id")));
        let key = CacheKey::from_factors(["empty"]);

        cache.put(key.clone(), None).unwrap();
        assert_eq!(cache.get(&key).unwrap(), None);
        assert_eq!(cache.hits(), 0);
        assert_eq!(cache.size().unwrap(), 1);
    }
}
