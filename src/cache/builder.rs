//! Assembles decorator stacks from [`CacheDefinition`]s.

use std::sync::Arc;

use tracing::debug;

use super::blocking::BlockingDecorator;
use super::config::{CacheDefinition, EvictionPolicy};
use super::error::CacheResult;
use super::eviction::{FifoDecorator, LruDecorator};
use super::scheduled::ScheduledDecorator;
use super::stats::StatsDecorator;
use super::store::PerpetualCache;
use super::traits::{Cache, SharedCache};

/// Builds the shared stack for one definition.
///
/// Layers, outermost first: blocking (optional), statistics, scheduled flush
/// (optional), eviction, perpetual store.
pub struct CacheBuilder {
    definition: CacheDefinition,
}

impl CacheBuilder {
    pub fn new(definition: CacheDefinition) -> Self {
        Self { definition }
    }

    pub fn definition(&self) -> &CacheDefinition {
        &self.definition
    }

    pub fn build<V>(&self) -> CacheResult<SharedCache<V>>
    where
        V: Clone + Send + Sync + 'static,
    {
        self.build_with_stats().map(|(cache, _)| cache)
    }

    /// Like [`build`](Self::build), also returning a handle on the
    /// statistics layer inside the stack.
    pub fn build_with_stats<V>(&self) -> CacheResult<(SharedCache<V>, Arc<StatsDecorator<V>>)>
    where
        V: Clone + Send + Sync + 'static,
    {
        let definition = &self.definition;
        let mut layers = vec!["perpetual"];

        let store: Box<dyn Cache<V>> = Box::new(PerpetualCache::new(definition.id.as_str())?);
        let mut cache: Box<dyn Cache<V>> = match definition.eviction {
            EvictionPolicy::Lru => Box::new(LruDecorator::with_capacity(store, definition.size)),
            EvictionPolicy::Fifo => {
                Box::new(FifoDecorator::with_capacity(store, definition.size))
            }
        };
        layers.push(definition.eviction.as_str());

        if let Some(interval) = definition.flush_interval {
            cache = Box::new(ScheduledDecorator::new(cache, interval));
            layers.push("scheduled");
        }

        let stats = Arc::new(StatsDecorator::new(cache));
        layers.push("stats");
        let cache: Box<dyn Cache<V>> = Box::new(Arc::clone(&stats));

        let shared: SharedCache<V> = if definition.blocking {
            layers.push("blocking");
            Arc::new(BlockingDecorator::with_timeout(
                cache,
                definition.blocking_timeout.unwrap_or_default(),
            ))
        } else {
            Arc::from(cache)
        };

        layers.reverse();
        debug!(
            cache_id = definition.id.as_str(),
            layers = %layers.join(" > "),
            size = definition.size.get(),
            read_only = definition.read_only,
            "Built cache stack"
        );
        Ok((shared, stats))
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::time::Duration;

    use super::*;
    use crate::cache::error::CacheError;
    use crate::cache::keys::CacheKey;

    fn key(n: i64) -> CacheKey {
        CacheKey::from_factors([n])
    }

    fn definition(id: &str, eviction: EvictionPolicy, size: usize) -> CacheDefinition {
        CacheDefinition {
            eviction,
            size: NonZeroUsize::new(size).expect("non-zero"),
            ..CacheDefinition::new(id)
        }
    }

    #[test]
    fn blocking_lru_stack_keeps_id_and_evicts() {
        let cache = CacheBuilder::new(CacheDefinition {
            blocking: true,
            blocking_timeout: Some(Duration::from_millis(50)),
            ..definition("blog.PostMapper", EvictionPolicy::Lru, 2)
        })
        .build::<String>()
        .expect("valid definition");

        assert_eq!(cache.id(), "blog.PostMapper");

        for n in 1..=3 {
            assert_eq!(cache.get(&key(n)).unwrap(), None);
            cache.put(key(n), Some(format!("row {n}"))).unwrap();
        }

        assert_eq!(cache.size().unwrap(), 2);
        assert_eq!(cache.get(&key(3)).unwrap(), Some("row 3".to_string()));
    }

    #[test]
    fn blocking_stack_times_out_on_held_key() {
        let cache = CacheBuilder::new(CacheDefinition {
            blocking: true,
            blocking_timeout: Some(Duration::from_millis(20)),
            ..definition("blog.PostMapper", EvictionPolicy::Lru, 8)
        })
        .build::<String>()
        .expect("valid definition");

        assert_eq!(cache.get(&key(1)).unwrap(), None);
        assert!(matches!(
            cache.get(&key(1)),
            Err(CacheError::LockTimeout { .. })
        ));
    }

    #[test]
    fn fifo_stack_evicts_in_insertion_order() {
        let cache = CacheBuilder::new(definition("fifo", EvictionPolicy::Fifo, 2))
            .build::<i64>()
            .expect("valid definition");

        cache.put(key(1), Some(1)).unwrap();
        cache.put(key(2), Some(2)).unwrap();
        cache.get(&key(1)).unwrap();
        cache.put(key(3), Some(3)).unwrap();

        assert_eq!(cache.get(&key(1)).unwrap(), None);
        assert_eq!(cache.get(&key(2)).unwrap(), Some(2));
    }

    #[test]
    fn stats_handle_observes_lookups_through_the_stack() {
        let (cache, stats) = CacheBuilder::new(definition("stats", EvictionPolicy::Lru, 8))
            .build_with_stats::<i64>()
            .expect("valid definition");

        cache.get(&key(1)).unwrap();
        cache.put(key(1), Some(1)).unwrap();
        cache.get(&key(1)).unwrap();

        assert_eq!(stats.requests(), 2);
        assert_eq!(stats.hits(), 1);
    }

    #[test]
    fn scheduled_flush_is_applied() {
        let cache = CacheBuilder::new(CacheDefinition {
            flush_interval: Some(Duration::from_millis(20)),
            ..definition("scheduled", EvictionPolicy::Lru, 8)
        })
        .build::<i64>()
        .expect("valid definition");

        cache.put(key(1), Some(1)).unwrap();
        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(cache.get(&key(1)).unwrap(), None);
    }

    #[test]
    fn blank_id_is_rejected() {
        let result = CacheBuilder::new(CacheDefinition::new("  ")).build::<i64>();
        assert!(matches!(result, Err(CacheError::MissingId)));
    }
}
