//! Terminal cache storage.
//!
//! `PerpetualCache` is the bottom of every decorator stack: an unbounded map
//! with no eviction and no expiry.

use std::collections::HashMap;
use std::sync::RwLock;

use super::error::{CacheError, CacheResult};
use super::keys::CacheKey;
use super::lock::{rw_read, rw_write};
use super::traits::Cache;

const SOURCE: &str = "cache::store";

/// Unbounded in-memory backing store.
pub struct PerpetualCache<V> {
    id: String,
    entries: RwLock<HashMap<CacheKey, Option<V>>>,
}

impl<V> PerpetualCache<V> {
    /// Create a store. The id must not be blank.
    pub fn new(id: impl Into<String>) -> Result<Self, CacheError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(CacheError::MissingId);
        }
        Ok(Self {
            id,
            entries: RwLock::new(HashMap::new()),
        })
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &CacheKey) -> bool {
        rw_read(&self.entries, SOURCE, "contains_key").contains_key(key)
    }
}

impl<V> Cache<V> for PerpetualCache<V>
where
    V: Clone + Send + Sync,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn size(&self) -> CacheResult<usize> {
        Ok(self.len())
    }

    fn put(&self, key: CacheKey, value: Option<V>) -> CacheResult<()> {
        rw_write(&self.entries, SOURCE, "put").insert(key, value);
        Ok(())
    }

    fn get(&self, key: &CacheKey) -> CacheResult<Option<V>> {
        Ok(rw_read(&self.entries, SOURCE, "get")
            .get(key)
            .cloned()
            .flatten())
    }

    fn remove(&self, key: &CacheKey) -> CacheResult<Option<V>> {
        Ok(rw_write(&self.entries, SOURCE, "remove")
            .remove(key)
            .flatten())
    }

    fn clear(&self) -> CacheResult<()> {
        rw_write(&self.entries, SOURCE, "clear").clear();
        Ok(())
    }
}
