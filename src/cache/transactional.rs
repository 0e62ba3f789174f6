//! Read-committed buffering over a shared cache.
//!
//! Values stored during a transaction stay private to it until `commit`.
//! Writing them straight to the shared delegate would let concurrent sessions
//! read results of a transaction that may still roll back.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tracing::{debug, error, warn};

use super::error::{CacheError, CacheResult};
use super::keys::CacheKey;
use super::lock::mutex_lock;
use super::traits::{Cache, SharedCache};

const SOURCE: &str = "cache::transactional";

struct PendingState<V> {
    clear_on_commit: bool,
    entries_to_add: HashMap<CacheKey, Option<V>>,
    entries_missed: HashSet<CacheKey>,
}

impl<V> Default for PendingState<V> {
    fn default() -> Self {
        Self {
            clear_on_commit: false,
            entries_to_add: HashMap::new(),
            entries_missed: HashSet::new(),
        }
    }
}

/// Outcome of a rollback.
///
/// Releasing a missed key on the delegate may fail; such failures are logged
/// and counted here instead of aborting the rollback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollbackReport {
    /// Missed keys whose release the delegate accepted.
    pub released: usize,
    /// Missed keys whose release failed and was suppressed.
    pub suppressed: usize,
}

impl RollbackReport {
    pub fn merge(&mut self, other: RollbackReport) {
        self.released += other.released;
        self.suppressed += other.suppressed;
    }

    pub fn is_clean(&self) -> bool {
        self.suppressed == 0
    }
}

/// Per-session transactional view of a shared cache.
///
/// One instance serves any number of transactions, one after another. It is
/// not meant to be used by two sessions at once.
pub struct TransactionalDecorator<V> {
    delegate: SharedCache<V>,
    state: Mutex<PendingState<V>>,
}

impl<V> TransactionalDecorator<V> {
    pub fn new(delegate: SharedCache<V>) -> Self {
        Self {
            delegate,
            state: Mutex::new(PendingState::default()),
        }
    }

    pub fn delegate(&self) -> &SharedCache<V> {
        &self.delegate
    }

    /// Number of staged writes.
    pub fn pending_len(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "pending_len")
            .entries_to_add
            .len()
    }

    /// Number of keys that missed during this transaction.
    pub fn missed_len(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "missed_len")
            .entries_missed
            .len()
    }

    pub fn is_clear_pending(&self) -> bool {
        mutex_lock(&self.state, SOURCE, "is_clear_pending").clear_on_commit
    }

    fn take_state(&self, op: &'static str) -> PendingState<V> {
        std::mem::take(&mut *mutex_lock(&self.state, SOURCE, op))
    }

    /// Publish this transaction's writes to the delegate.
    ///
    /// The pending state is reset before any delegate call. Ordinary failures
    /// are logged and every remaining write is still attempted; the first one
    /// is returned. A fatal failure stops the flush at once and the writes not
    /// yet applied are dropped.
    pub fn commit(&self) -> CacheResult<()> {
        let PendingState {
            clear_on_commit,
            entries_to_add,
            entries_missed,
        } = self.take_state("commit");

        let mut first_error: Option<CacheError> = None;

        if clear_on_commit {
            self.absorb(&mut first_error, "clear", self.delegate.clear())?;
        }

        let unresolved: Vec<CacheKey> = entries_missed
            .into_iter()
            .filter(|key| !entries_to_add.contains_key(key))
            .collect();
        let written = entries_to_add.len();

        for (key, value) in entries_to_add {
            self.absorb(&mut first_error, "put", self.delegate.put(key, value))?;
        }
        // Caching the miss also releases any population lock held below.
        for key in &unresolved {
            self.absorb(
                &mut first_error,
                "cache_miss",
                self.delegate.put(key.clone(), None),
            )?;
        }

        debug!(
            cache_id = self.delegate.id(),
            cleared = clear_on_commit,
            written,
            cached_misses = unresolved.len(),
            failed = first_error.is_some(),
            "Committed transactional cache"
        );

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn absorb(
        &self,
        first_error: &mut Option<CacheError>,
        op: &'static str,
        result: CacheResult<()>,
    ) -> CacheResult<()> {
        let Err(err) = result else {
            return Ok(());
        };
        if err.is_fatal() {
            error!(
                cache_id = self.delegate.id(),
                op,
                error = %err,
                "Aborting commit on inconsistent lock table"
            );
            return Err(err);
        }
        warn!(
            cache_id = self.delegate.id(),
            op,
            error = %err,
            "Cache write failed during commit"
        );
        first_error.get_or_insert(err);
        Ok(())
    }

    /// Discard this transaction's writes and release every missed key.
    pub fn rollback(&self) -> RollbackReport {
        let PendingState { entries_missed, .. } = self.take_state("rollback");

        let mut report = RollbackReport::default();
        for key in &entries_missed {
            match self.delegate.remove(key) {
                Ok(_) => report.released += 1,
                Err(err) => {
                    warn!(
                        cache_id = self.delegate.id(),
                        %key,
                        error = %err,
                        "Failed to release missed key during rollback"
                    );
                    report.suppressed += 1;
                }
            }
        }

        debug!(
            cache_id = self.delegate.id(),
            released = report.released,
            suppressed = report.suppressed,
            "Rolled back transactional cache"
        );
        report
    }
}

impl<V> Cache<V> for TransactionalDecorator<V>
where
    V: Send,
{
    fn id(&self) -> &str {
        self.delegate.id()
    }

    fn size(&self) -> CacheResult<usize> {
        self.delegate.size()
    }

    /// Stages the value for commit; the delegate is untouched.
    fn put(&self, key: CacheKey, value: Option<V>) -> CacheResult<()> {
        mutex_lock(&self.state, SOURCE, "put")
            .entries_to_add
            .insert(key, value);
        Ok(())
    }

    /// Reads the committed value, recording misses. Reads absent while a
    /// clear is pending, even for keys the delegate still holds.
    fn get(&self, key: &CacheKey) -> CacheResult<Option<V>> {
        let value = self.delegate.get(key)?;

        let mut state = mutex_lock(&self.state, SOURCE, "get");
        if value.is_none() {
            state.entries_missed.insert(key.clone());
        }
        if state.clear_on_commit {
            return Ok(None);
        }
        Ok(value)
    }

    /// Removal inside a transaction is not supported; use `clear`.
    fn remove(&self, _key: &CacheKey) -> CacheResult<Option<V>> {
        Ok(None)
    }

    /// Schedules a full clear at commit and drops the writes staged so far.
    fn clear(&self) -> CacheResult<()> {
        let mut state = mutex_lock(&self.state, SOURCE, "clear");
        state.clear_on_commit = true;
        state.entries_to_add.clear();
        Ok(())
    }
}
