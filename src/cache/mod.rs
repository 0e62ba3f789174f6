//! Mapcache cache system
//!
//! A second-level query cache for data-mapper sessions:
//!
//! - **Store**: `PerpetualCache`, an unbounded map at the bottom of every stack
//! - **Decorators**: eviction (LRU/FIFO), scheduled flush, statistics and
//!   per-key population locks, each wrapping any other [`Cache`]
//! - **Transactions**: `TransactionalDecorator` buffers a session's writes
//!   until commit; `TransactionalCacheManager` fans commit/rollback out
//!
//! ## Configuration
//!
//! Stacks are described by [`CacheDefinition`]s in `mapcache.toml` and
//! assembled by [`CacheBuilder`]:
//!
//! ```toml
//! [[caches]]
//! id = "blog.PostMapper"
//! eviction = "lru"
//! size = 1024
//! blocking = true
//! # ... see config.rs for all options
//! ```

mod blocking;
mod builder;
mod config;
mod error;
mod eviction;
mod keys;
mod lock;
mod manager;
mod scheduled;
mod stats;
mod store;
mod traits;
mod transactional;

pub use blocking::BlockingDecorator;
pub use builder::CacheBuilder;
pub use config::{CacheDefinition, EvictionPolicy};
pub use error::{CacheError, CacheResult};
pub use eviction::{DEFAULT_CAPACITY, FifoDecorator, LruDecorator};
pub use keys::{CacheKey, Factor};
pub use manager::TransactionalCacheManager;
pub use scheduled::ScheduledDecorator;
pub use stats::StatsDecorator;
pub use store::PerpetualCache;
pub use traits::{Cache, SharedCache, same_cache};
pub use transactional::{RollbackReport, TransactionalDecorator};
