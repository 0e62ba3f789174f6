//! Synthetic session workload over the configured caches.
//!
//! Each session runs one lookup per transaction: a hit is used as is, a miss
//! "loads" a row and stages it, then the transaction commits (or rolls back
//! every Nth time). Sessions share the cache stacks, so blocking caches see
//! real contention on hot keys.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{
    Cache, CacheBuilder, CacheDefinition, CacheError, CacheKey, Factor, SharedCache,
    StatsDecorator, TransactionalCacheManager,
};
use crate::config::SimulateArgs;

use super::error::AppError;

const STATEMENT_ID: &str = "simulate.selectRowById";
const STATEMENT_SQL: &str = "SELECT id, payload FROM rows WHERE id = ?";

/// Validated workload parameters.
#[derive(Debug, Clone)]
pub struct SimulationPlan {
    pub threads: NonZeroUsize,
    pub queries: usize,
    pub distinct_keys: NonZeroUsize,
    /// Roll back every Nth transaction; 0 always commits.
    pub rollback_every: usize,
}

impl SimulationPlan {
    pub fn from_args(args: &SimulateArgs) -> Result<Self, AppError> {
        let threads = NonZeroUsize::new(args.threads)
            .ok_or_else(|| AppError::validation("--threads must be greater than zero"))?;
        let distinct_keys = NonZeroUsize::new(args.distinct_keys)
            .ok_or_else(|| AppError::validation("--distinct-keys must be greater than zero"))?;

        Ok(Self {
            threads,
            queries: args.queries,
            distinct_keys,
            rollback_every: args.rollback_every,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheReport {
    pub id: String,
    pub size: usize,
    pub requests: u64,
    pub hits: u64,
    pub hit_ratio: f64,
    /// Rows synthesized after a miss.
    pub loads: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationReport {
    pub caches: Vec<CacheReport>,
    pub commits: u64,
    pub rollbacks: u64,
    pub lock_timeouts: u64,
    pub suppressed_releases: u64,
}

struct SimulatedCache {
    cache: SharedCache<String>,
    stats: Arc<StatsDecorator<String>>,
    loads: AtomicU64,
}

#[derive(Debug, Default)]
struct SessionTally {
    commits: u64,
    rollbacks: u64,
    lock_timeouts: u64,
    suppressed_releases: u64,
}

/// Build every definition and run `plan` against the resulting caches.
pub fn run(
    definitions: &[CacheDefinition],
    plan: &SimulationPlan,
) -> Result<SimulationReport, AppError> {
    if definitions.is_empty() {
        return Err(AppError::validation("no caches configured"));
    }

    let caches = definitions
        .iter()
        .map(|definition| {
            let (cache, stats) =
                CacheBuilder::new(definition.clone()).build_with_stats::<String>()?;
            Ok(SimulatedCache {
                cache,
                stats,
                loads: AtomicU64::new(0),
            })
        })
        .collect::<Result<Vec<_>, CacheError>>()?;

    info!(
        caches = caches.len(),
        threads = plan.threads.get(),
        queries = plan.queries,
        distinct_keys = plan.distinct_keys.get(),
        "Starting simulation"
    );

    let tallies = thread::scope(|scope| {
        let handles: Vec<_> = (0..plan.threads.get())
            .map(|session| {
                let caches = caches.as_slice();
                scope.spawn(move || run_session(session, caches, plan))
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| AppError::unexpected("simulation session panicked"))?
            })
            .collect::<Result<Vec<_>, AppError>>()
    })?;

    let mut report = SimulationReport::default();
    for tally in tallies {
        report.commits += tally.commits;
        report.rollbacks += tally.rollbacks;
        report.lock_timeouts += tally.lock_timeouts;
        report.suppressed_releases += tally.suppressed_releases;
    }

    for simulated in &caches {
        let cache_report = CacheReport {
            id: simulated.cache.id().to_owned(),
            size: simulated.cache.size()?,
            requests: simulated.stats.requests(),
            hits: simulated.stats.hits(),
            hit_ratio: simulated.stats.hit_ratio(),
            loads: simulated.loads.load(Ordering::Relaxed),
        };
        info!(
            cache_id = cache_report.id.as_str(),
            size = cache_report.size,
            requests = cache_report.requests,
            hit_ratio = cache_report.hit_ratio,
            loads = cache_report.loads,
            "Cache summary"
        );
        report.caches.push(cache_report);
    }

    Ok(report)
}

fn row_key(row: usize) -> CacheKey {
    CacheKey::from_factors([
        Factor::from(STATEMENT_ID),
        Factor::from(0_i64),
        Factor::from(i64::from(i32::MAX)),
        Factor::from(STATEMENT_SQL),
        Factor::from(row as i64),
    ])
}

fn run_session(
    session: usize,
    caches: &[SimulatedCache],
    plan: &SimulationPlan,
) -> Result<SessionTally, AppError> {
    let mut manager = TransactionalCacheManager::new();
    let mut tally = SessionTally::default();

    for query in 0..plan.queries {
        let target = &caches[(session + query) % caches.len()];
        let row = session
            .wrapping_mul(7919)
            .wrapping_add(query.wrapping_mul(104_729))
            % plan.distinct_keys.get();
        let key = row_key(row);

        match manager.get(&target.cache, &key) {
            Ok(Some(_)) => {}
            Ok(None) => {
                target.loads.fetch_add(1, Ordering::Relaxed);
                manager.put(&target.cache, key, Some(format!("row-{row}")))?;
            }
            Err(CacheError::LockTimeout { .. }) => {
                tally.lock_timeouts += 1;
                tally.rollbacks += 1;
                tally.suppressed_releases += manager.rollback_all().suppressed as u64;
                continue;
            }
            Err(err) => {
                let report = manager.rollback_all();
                warn!(
                    session,
                    error = %err,
                    suppressed = report.suppressed,
                    "Aborting simulation session"
                );
                return Err(err.into());
            }
        }

        if plan.rollback_every > 0 && (query + 1) % plan.rollback_every == 0 {
            tally.rollbacks += 1;
            tally.suppressed_releases += manager.rollback_all().suppressed as u64;
        } else if let Err(err) = manager.commit_all() {
            let report = manager.rollback_all();
            warn!(
                session,
                error = %err,
                suppressed = report.suppressed,
                "Commit failed; rolled back remaining caches"
            );
            return Err(err.into());
        } else {
            tally.commits += 1;
        }
    }

    debug!(
        session,
        commits = tally.commits,
        rollbacks = tally.rollbacks,
        lock_timeouts = tally.lock_timeouts,
        "Simulation session finished"
    );
    Ok(tally)
}
