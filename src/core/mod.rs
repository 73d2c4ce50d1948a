mod cache;
mod deterministic;
mod engine;
mod error;
mod metrics;
mod rates;
mod scenario;
mod types;

pub use cache::{DEFAULT_CAPACITY, MonteCarloCache, MonteCarloKey};
pub use deterministic::{ContributionTiming, deterministic_path, deterministic_path_with_timing};
pub use engine::{
    CancelToken, MAX_MATRIX_CELLS, MonteCarloRequest, PERCENTILES, SimulationRun, percentile,
    run_monte_carlo, run_monte_carlo_cancellable, simulate_path, simulate_run,
};
pub use error::{ForecastError, ForecastResult};
pub use metrics::{
    DEFAULT_HISTOGRAM_BINS, HistogramBin, MAX_HISTOGRAM_BINS, TerminalSummary, cagr, histogram,
    summarize_terminal,
};
pub use rates::{
    annual_std_to_monthly, annual_to_monthly_return, apply_adjustments, monthly_log_drift,
    validate_assumption,
};
pub use scenario::{
    DeterministicProjection, ProjectionReport, ProjectionRequest, Scenario, ScenarioReport,
    StochasticProjection, project_scenarios, project_scenarios_cached,
};
pub use types::{
    Adjustments, MAX_HORIZON_YEARS, MONTHS_PER_YEAR, ModelKind, MonteCarloResult, PercentileRow, PercentileSeries,
    PlanInputs, ReturnAssumption, TerminalDistribution, YearBalance,
};
