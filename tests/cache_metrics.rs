use std::num::NonZeroUsize;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use mapcache::cache::{CacheBuilder, CacheDefinition, CacheError, CacheKey, EvictionPolicy};
use mapcache::infra::telemetry;
use metrics::Unit;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serial_test::serial;

struct Sample {
    name: String,
    cache: Option<String>,
    policy: Option<String>,
    unit: Option<Unit>,
    described: bool,
    value: u64,
}

fn snapshotter() -> &'static Snapshotter {
    static SNAPSHOTTER: OnceLock<Snapshotter> = OnceLock::new();
    SNAPSHOTTER.get_or_init(|| {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        recorder
            .install()
            .expect("debug metrics recorder should install in this test process");
        telemetry::describe_metrics();
        snapshotter
    })
}

fn samples() -> Vec<Sample> {
    snapshotter()
        .snapshot()
        .into_vec()
        .into_iter()
        .filter_map(|(composite_key, unit, description, value)| {
            let DebugValue::Counter(value) = value else {
                return None;
            };
            let key = composite_key.key();
            let label = |name: &str| {
                key.labels()
                    .find(|label| label.key() == name)
                    .map(|label| label.value().to_string())
            };
            Some(Sample {
                name: key.name().to_string(),
                cache: label("cache"),
                policy: label("policy"),
                unit,
                described: description.is_some(),
                value,
            })
        })
        .collect()
}

fn counter(samples: &[Sample], name: &str, cache: &str) -> u64 {
    samples
        .iter()
        .filter(|sample| sample.name == name && sample.cache.as_deref() == Some(cache))
        .map(|sample| sample.value)
        .sum()
}

fn key(n: i64) -> CacheKey {
    CacheKey::from_factors([n])
}

#[test]
#[serial]
fn lookups_emit_hit_and_miss_counters() {
    snapshotter();
    let cache = CacheBuilder::new(CacheDefinition::new("metrics.lookups"))
        .build::<String>()
        .expect("valid definition");

    assert_eq!(cache.get(&key(1)).unwrap(), None);
    cache.put(key(1), Some("one".to_string())).unwrap();
    cache.get(&key(1)).unwrap();
    cache.get(&key(1)).unwrap();

    let samples = samples();
    assert_eq!(counter(&samples, "mapcache_hit_total", "metrics.lookups"), 2);
    assert_eq!(counter(&samples, "mapcache_miss_total", "metrics.lookups"), 1);

    let hit = samples
        .iter()
        .find(|sample| sample.name == "mapcache_hit_total")
        .expect("hit counter recorded");
    assert_eq!(hit.unit, Some(Unit::Count));
    assert!(hit.described);
}

#[test]
#[serial]
fn eviction_counter_is_labelled_by_policy() {
    snapshotter();
    let cache = CacheBuilder::new(CacheDefinition {
        eviction: EvictionPolicy::Fifo,
        size: NonZeroUsize::new(2).expect("non-zero"),
        ..CacheDefinition::new("metrics.evictions")
    })
    .build::<i64>()
    .expect("valid definition");

    for n in 1..=4 {
        cache.put(key(n), Some(n)).unwrap();
    }

    let samples = samples();
    let evictions: Vec<_> = samples
        .iter()
        .filter(|sample| {
            sample.name == "mapcache_evict_total"
                && sample.cache.as_deref() == Some("metrics.evictions")
        })
        .collect();
    assert_eq!(evictions.len(), 1);
    assert_eq!(evictions[0].policy.as_deref(), Some("fifo"));
    assert_eq!(evictions[0].value, 2);
}

#[test]
#[serial]
fn scheduled_flush_and_lock_timeout_are_counted() {
    snapshotter();
    let cache = CacheBuilder::new(CacheDefinition {
        flush_interval: Some(Duration::from_millis(100)),
        blocking: true,
        blocking_timeout: Some(Duration::from_millis(20)),
        ..CacheDefinition::new("metrics.timing")
    })
    .build::<i64>()
    .expect("valid definition");

    assert_eq!(cache.get(&key(1)).unwrap(), None);
    assert!(matches!(
        cache.get(&key(1)),
        Err(CacheError::LockTimeout { .. })
    ));
    cache.put(key(1), Some(1)).unwrap();

    thread::sleep(Duration::from_millis(150));
    assert_eq!(cache.get(&key(1)).unwrap(), None);
    cache.remove(&key(1)).unwrap();

    let samples = samples();
    assert_eq!(
        counter(&samples, "mapcache_lock_timeout_total", "metrics.timing"),
        1
    );
    assert_eq!(counter(&samples, "mapcache_flush_total", "metrics.timing"), 1);
}
