use std::time::Duration;

use thiserror::Error;

/// Result alias used by every cache operation.
pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("not allowed to update a null cache key")]
    NullKeyMutation,
    #[error("could not acquire a lock within {timeout:?} for key `{key}` in cache `{cache_id}`")]
    LockTimeout {
        key: String,
        cache_id: String,
        timeout: Duration,
    },
    #[error("released an unacquired lock for key `{key}` in cache `{cache_id}`")]
    LockConsistencyViolation { key: String, cache_id: String },
    #[error("cache instances require a non-empty id")]
    MissingId,
    #[error("cache `{cache_id}` failed: {message}")]
    Delegate { cache_id: String, message: String },
}

impl CacheError {
    pub fn delegate(cache_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Delegate {
            cache_id: cache_id.into(),
            message: message.into(),
        }
    }

    /// Errors that leave the lock table in an unknown state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::LockConsistencyViolation { .. })
    }
}
