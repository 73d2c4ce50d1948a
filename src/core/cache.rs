//! Bounded memoization for Monte Carlo batches.
//!
//! Wraps [`run_monte_carlo_cancellable`] with a `moka::sync::Cache` keyed on the
//! request's bit patterns. Only seeded requests are cached: an unseeded request
//! has to draw fresh entropy on every call.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use moka::sync::Cache;
use tracing::debug;

use super::engine::{CancelToken, MonteCarloRequest, run_monte_carlo_cancellable};
use super::error::ForecastResult;
use super::types::{ModelKind, MonteCarloResult};

/// Default number of batches retained.
pub const DEFAULT_CAPACITY: u64 = 64;

/// Hashable identity of a seeded [`MonteCarloRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonteCarloKey {
    run_count: usize,
    starting_balance: u64,
    monthly_contribution: u64,
    horizon_years: u32,
    mean_annual: u64,
    stdev_annual: u64,
    model: ModelKind,
    seed: u64,
}

impl MonteCarloKey {
    pub fn for_request(request: &MonteCarloRequest) -> Option<Self> {
        let seed = request.seed?;
        Some(Self {
            run_count: request.run_count,
            starting_balance: request.plan.starting_balance.to_bits(),
            monthly_contribution: request.plan.monthly_contribution.to_bits(),
            horizon_years: request.plan.horizon_years,
            mean_annual: request.assumption.mean_annual.to_bits(),
            stdev_annual: request.assumption.stdev_annual.to_bits(),
            model: request.model,
            seed,
        })
    }
}

pub struct MonteCarloCache {
    cache: Cache<MonteCarloKey, Arc<MonteCarloResult>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for MonteCarloCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MonteCarloCache {
    pub fn new(max_entries: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(max_entries).build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn run(&self, request: &MonteCarloRequest) -> ForecastResult<Arc<MonteCarloResult>> {
        self.run_cancellable(request, None)
    }

    /// Errors, including cancellation, are never cached.
    pub fn run_cancellable(
        &self,
        request: &MonteCarloRequest,
        cancel: Option<&CancelToken>,
    ) -> ForecastResult<Arc<MonteCarloResult>> {
        let Some(key) = MonteCarloKey::for_request(request) else {
            return run_monte_carlo_cancellable(request, cancel).map(Arc::new);
        };

        if let Some(hit) = self.cache.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(seed = key.seed, "monte carlo cache hit");
            return Ok(hit);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(seed = key.seed, "monte carlo cache miss");
        let result = Arc::new(run_monte_carlo_cancellable(request, cancel)?);
        self.cache.insert(key, Arc::clone(&result));
        Ok(result)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ForecastError;
    use crate::core::types::{PlanInputs, ReturnAssumption};

    fn request(seed: Option<u64>) -> MonteCarloRequest {
        MonteCarloRequest {
            run_count: 100,
            plan: PlanInputs {
                starting_balance: 5_000.0,
                monthly_contribution: 300.0,
                horizon_years: 10,
            },
            assumption: ReturnAssumption::new(0.08, 0.04),
            model: ModelKind::Lognormal,
            seed,
        }
    }

    #[test]
    fn repeated_seeded_request_is_served_from_cache() {
        let cache = MonteCarloCache::default();
        let first = cache.run(&request(Some(42))).expect("valid");
        let second = cache.run(&request(Some(42))).expect("valid");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn any_argument_change_is_a_new_entry() {
        let cache = MonteCarloCache::default();
        let base = cache.run(&request(Some(42))).expect("valid");

        let mut changed = request(Some(42));
        changed.assumption.stdev_annual = 0.05;
        let other = cache.run(&changed).expect("valid");
        assert!(!Arc::ptr_eq(&base, &other));
        assert_eq!(cache.misses(), 2);
        assert_eq!(cache.hits(), 0);
    }

    #[test]
    fn unseeded_requests_bypass_the_cache() {
        let cache = MonteCarloCache::default();
        assert_eq!(MonteCarloKey::for_request(&request(None)), None);
        cache.run(&request(None)).expect("valid");
        cache.run(&request(None)).expect("valid");
        assert_eq!(cache.hits(), 0);
        assert_eq!(cache.misses(), 0);
    }

    #[test]
    fn cancelled_batches_are_not_memoized() {
        let cache = MonteCarloCache::default();
        let token = CancelToken::new();
        token.cancel();
        let outcome = cache.run_cancellable(&request(Some(3)), Some(&token));
        assert_eq!(outcome, Err(ForecastError::Cancelled));

        let result = cache.run(&request(Some(3))).expect("valid");
        assert_eq!(result.terminal.len(), 100);
        assert_eq!(cache.hits(), 0);
    }

    #[test]
    fn cached_result_matches_direct_run() {
        let cache = MonteCarloCache::default();
        let cached = cache.run(&request(Some(17))).expect("valid");
        let direct = crate::core::engine::run_monte_carlo(&request(Some(17))).expect("valid");
        assert_eq!(*cached, direct);
    }
}
