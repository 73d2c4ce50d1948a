use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;
use rand_distr::{Distribution, StandardNormal};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::{debug, warn};

use super::error::{ForecastError, ForecastResult};
use super::rates::{
    annual_std_to_monthly, annual_to_monthly_return, monthly_log_drift, validate_assumption,
};
use super::types::{
    MONTHS_PER_YEAR, ModelKind, MonteCarloResult, PercentileRow, PercentileSeries, PlanInputs,
    ReturnAssumption, TerminalDistribution,
};

/// Percentiles reported for every year of a batch.
pub const PERCENTILES: [f64; 5] = [5.0, 25.0, 50.0, 75.0, 95.0];

/// Ceiling on year-end balances held by one batch (`run_count * horizon_years`).
pub const MAX_MATRIX_CELLS: usize = 50_000_000;

/// Shared flag for aborting a Monte Carlo batch between runs.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonteCarloRequest {
    pub run_count: usize,
    pub plan: PlanInputs,
    pub assumption: ReturnAssumption,
    pub model: ModelKind,
    /// `None` draws a fresh seed from entropy.
    pub seed: Option<u64>,
}

/// Monthly balances of one simulated trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationRun {
    pub monthly_balances: Vec<f64>,
}

impl SimulationRun {
    pub fn year_ends(&self) -> Vec<f64> {
        self.monthly_balances
            .chunks_exact(MONTHS_PER_YEAR)
            .filter_map(|year| year.last().copied())
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct MonthlyReturnModel {
    model: ModelKind,
    drift: f64,
    sigma: f64,
}

impl MonthlyReturnModel {
    fn new(assumption: &ReturnAssumption, model: ModelKind) -> ForecastResult<Self> {
        validate_assumption(assumption)?;
        let sigma = annual_std_to_monthly(assumption.stdev_annual);
        let drift = match model {
            // Drift correction keeps the expected simple return on the mean, not the log return.
            ModelKind::Lognormal => monthly_log_drift(assumption.mean_annual)? - 0.5 * sigma * sigma,
            ModelKind::Normal => annual_to_monthly_return(assumption.mean_annual)?,
        };
        Ok(Self { model, drift, sigma })
    }

    fn monthly_return(&self, z: f64) -> f64 {
        match self.model {
            ModelKind::Lognormal => (self.drift + self.sigma * z).exp_m1(),
            ModelKind::Normal => self.drift + self.sigma * z,
        }
    }
}

/// Simulate one trajectory and return the balance at the end of each year.
pub fn simulate_path<R: Rng + ?Sized>(
    plan: &PlanInputs,
    assumption: &ReturnAssumption,
    model: ModelKind,
    rng: &mut R,
) -> ForecastResult<Vec<f64>> {
    plan.validate()?;
    let returns = MonthlyReturnModel::new(assumption, model)?;
    let mut year_ends = vec![0.0; plan.horizon_years as usize];
    fill_year_ends(plan, &returns, rng, &mut year_ends);
    Ok(year_ends)
}

/// Same draws as [`simulate_path`], keeping every monthly balance.
pub fn simulate_run<R: Rng + ?Sized>(
    plan: &PlanInputs,
    assumption: &ReturnAssumption,
    model: ModelKind,
    rng: &mut R,
) -> ForecastResult<SimulationRun> {
    plan.validate()?;
    let returns = MonthlyReturnModel::new(assumption, model)?;
    let mut monthly_balances = Vec::with_capacity(plan.months());
    walk_months(plan, &returns, rng, |_, balance| monthly_balances.push(balance));
    Ok(SimulationRun { monthly_balances })
}

fn fill_year_ends<R: Rng + ?Sized>(
    plan: &PlanInputs,
    returns: &MonthlyReturnModel,
    rng: &mut R,
    year_ends: &mut [f64],
) {
    walk_months(plan, returns, rng, |month, balance| {
        if (month + 1) % MONTHS_PER_YEAR == 0 {
            year_ends[month / MONTHS_PER_YEAR] = balance;
        }
    });
}

fn walk_months<R: Rng + ?Sized>(
    plan: &PlanInputs,
    returns: &MonthlyReturnModel,
    rng: &mut R,
    mut on_month: impl FnMut(usize, f64),
) {
    let mut balance = plan.starting_balance;
    for month in 0..plan.months() {
        let z: f64 = StandardNormal.sample(rng);
        // Contribute first, then grow: new money earns this month's return.
        balance = (balance + plan.monthly_contribution) * (1.0 + returns.monthly_return(z));
        on_month(month, balance);
    }
}

pub fn run_monte_carlo(request: &MonteCarloRequest) -> ForecastResult<MonteCarloResult> {
    run_monte_carlo_cancellable(request, None)
}

/// Run a batch, checking `cancel` before each run. A cancelled batch yields
/// [`ForecastError::Cancelled`] and no partial output.
pub fn run_monte_carlo_cancellable(
    request: &MonteCarloRequest,
    cancel: Option<&CancelToken>,
) -> ForecastResult<MonteCarloResult> {
    let plan = request.plan;
    plan.validate()?;
    let cells = check_run_count(request.run_count, plan.horizon_years)?;
    let returns = MonthlyReturnModel::new(&request.assumption, request.model)?;

    let seed = request.seed.unwrap_or_else(rand::random);
    let years = plan.horizon_years as usize;
    let run_count = request.run_count;
    debug!(
        run_count,
        years,
        seed,
        model = ?request.model,
        "starting monte carlo batch"
    );

    // Run i draws from stream i of the master key, so runs never share a stream
    // and results do not depend on which worker executes them.
    let master = ChaCha12Rng::seed_from_u64(seed);
    let mut matrix = vec![0.0; cells];

    let run_row = |(run, row): (usize, &mut [f64])| -> ForecastResult<()> {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(ForecastError::Cancelled);
        }
        let mut rng = master.clone();
        rng.set_stream(run as u64);
        fill_year_ends(&plan, &returns, &mut rng, row);
        Ok(())
    };

    #[cfg(feature = "parallel")]
    let outcome = matrix.par_chunks_mut(years).enumerate().try_for_each(run_row);
    #[cfg(not(feature = "parallel"))]
    let outcome = matrix.chunks_mut(years).enumerate().try_for_each(run_row);

    if let Err(err) = outcome {
        warn!(run_count, seed, "monte carlo batch aborted: {err}");
        return Err(err);
    }

    let percentiles = percentile_series(&matrix, run_count, years);
    let terminal = matrix.chunks_exact(years).map(|row| row[years - 1]).collect();
    debug!(run_count, years, seed, "finished monte carlo batch");

    Ok(MonteCarloResult {
        seed,
        run_count,
        model: request.model,
        percentiles,
        terminal: TerminalDistribution::new(terminal),
    })
}

/// Validates a batch size and returns the number of matrix cells it needs.
pub(crate) fn check_run_count(run_count: usize, horizon_years: u32) -> ForecastResult<usize> {
    if run_count < 1 {
        return Err(ForecastError::InvalidHorizon {
            field: "run_count",
            value: run_count as u64,
        });
    }
    let years = (horizon_years as usize).max(1);
    run_count
        .checked_mul(years)
        .filter(|cells| *cells <= MAX_MATRIX_CELLS)
        .ok_or(ForecastError::TooLarge {
            field: "run_count",
            value: run_count as u64,
            limit: (MAX_MATRIX_CELLS / years) as u64,
        })
}

fn percentile_series(matrix: &[f64], run_count: usize, years: usize) -> PercentileSeries {
    let mut column = Vec::with_capacity(run_count);
    let rows = (0..years)
        .map(|year| {
            column.clear();
            column.extend(matrix.iter().skip(year).step_by(years).copied());
            let [p5, p25, p50, p75, p95] = PERCENTILES.map(|p| percentile(&mut column, p));
            PercentileRow {
                year: year as u32 + 1,
                p5,
                p25,
                p50,
                p75,
                p95,
            }
        })
        .collect();
    PercentileSeries::from_rows(rows)
}

/// Linear interpolation between order statistics at rank `p/100 * (n-1)`.
///
/// Reorders `values` in place; runs in linear time on average.
pub fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0).clamp(0.0, 1.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    let (_, lo, above) = values.select_nth_unstable_by(lower, f64::total_cmp);
    let lo = *lo;
    if lower == upper {
        return lo;
    }

    let hi = above.iter().copied().min_by(f64::total_cmp).unwrap_or(lo);
    let w = rank - lower as f64;
    (lo + (hi - lo) * w).max(lo).min(hi)
}
