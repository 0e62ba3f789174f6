//! Cache definitions.
//!
//! One `[[caches]]` table per namespace in `mapcache.toml`:
//!
//! ```toml
//! [[caches]]
//! id = "blog.PostMapper"
//! eviction = "lru"
//! size = 512
//! flush_interval_ms = 60000
//! blocking = true
//! blocking_timeout_ms = 2000
//! ```

use std::fmt;
use std::num::NonZeroUsize;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::eviction::DEFAULT_CAPACITY;

/// Which entry a full cache gives up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    #[default]
    Lru,
    Fifo,
}

impl EvictionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lru => "lru",
            Self::Fifo => "fifo",
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Construction parameters for one shared cache stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheDefinition {
    /// Namespace id; also the identity of the built cache.
    pub id: String,
    pub eviction: EvictionPolicy,
    /// Eviction capacity in entries.
    pub size: NonZeroUsize,
    /// Full flush period. `0` in configuration disables it.
    #[serde(rename = "flush_interval_ms", with = "optional_millis")]
    pub flush_interval: Option<Duration>,
    /// Callers promise not to mutate values they read.
    pub read_only: bool,
    /// Serialize population of each key across sessions.
    pub blocking: bool,
    /// Lock wait bound. `0` in configuration waits forever.
    #[serde(rename = "blocking_timeout_ms", with = "optional_millis")]
    pub blocking_timeout: Option<Duration>,
}

impl Default for CacheDefinition {
    fn default() -> Self {
        Self {
            id: String::new(),
            eviction: EvictionPolicy::default(),
            size: DEFAULT_CAPACITY,
            flush_interval: None,
            read_only: false,
            blocking: false,
            blocking_timeout: None,
        }
    }
}

impl CacheDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

mod optional_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = value.map_or(0, |duration| duration.as_millis() as u64);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok((millis > 0).then(|| Duration::from_millis(millis)))
    }
}
