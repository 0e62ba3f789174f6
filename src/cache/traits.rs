//! The capability every store and decorator implements.

use std::sync::Arc;

use super::error::CacheResult;
use super::keys::CacheKey;

/// Common contract of the backing store and every decorator stacked on it.
///
/// Values are stored as `Option<V>`: `None` is a legitimate entry (a cached
/// miss) that occupies a slot but reads back as absent.
///
/// Implementations are shared across threads and synchronize internally.
pub trait Cache<V>: Send + Sync {
    /// Stable identity. Caches with the same id are the same logical cache.
    fn id(&self) -> &str;

    fn size(&self) -> CacheResult<usize>;

    /// Unconditional upsert.
    fn put(&self, key: CacheKey, value: Option<V>) -> CacheResult<()>;

    fn get(&self, key: &CacheKey) -> CacheResult<Option<V>>;

    fn remove(&self, key: &CacheKey) -> CacheResult<Option<V>>;

    fn clear(&self) -> CacheResult<()>;
}

impl<V, C> Cache<V> for Arc<C>
where
    C: Cache<V> + ?Sized,
{
    fn id(&self) -> &str {
        (**self).id()
    }

    fn size(&self) -> CacheResult<usize> {
        (**self).size()
    }

    fn put(&self, key: CacheKey, value: Option<V>) -> CacheResult<()> {
        (**self).put(key, value)
    }

    fn get(&self, key: &CacheKey) -> CacheResult<Option<V>> {
        (**self).get(key)
    }

    fn remove(&self, key: &CacheKey) -> CacheResult<Option<V>> {
        (**self).remove(key)
    }

    fn clear(&self) -> CacheResult<()> {
        (**self).clear()
    }
}

/// A cache stack shared between sessions.
pub type SharedCache<V> = Arc<dyn Cache<V>>;

/// Identity comparison between two caches, possibly with different stacks.
pub fn same_cache<V>(left: &dyn Cache<V>, right: &dyn Cache<V>) -> bool {
    left.id() == right.id()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::eviction::LruDecorator;
    use crate::cache::store::PerpetualCache;

    #[test]
    fn caches_are_identified_by_id() {
        let plain = PerpetualCache::<u8>::new("blog.PostMapper").expect("valid id");
        let decorated = LruDecorator::<u8>::new(Box::new(
            PerpetualCache::<u8>::new("blog.PostMapper").expect("valid id"),
        ));
        let other = PerpetualCache::<u8>::new("blog.AuthorMapper").expect("valid id");

        assert!(same_cache(&plain, &decorated));
        assert!(!same_cache(&plain, &other));
    }

    #[test]
    fn shared_handles_delegate_to_the_inner_cache() {
        let shared: SharedCache<u8> =
            Arc::new(PerpetualCache::<u8>::new("shared").expect("valid id"));
        let key = CacheKey::from_factors(["k"]);

        shared.put(key.clone(), Some(7)).unwrap();

        assert_eq!(shared.get(&key).unwrap(), Some(7));
        assert_eq!(shared.remove(&key).unwrap(), Some(7));
        assert_eq!(shared.size().unwrap(), 0);
    }
}
