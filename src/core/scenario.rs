use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::cache::MonteCarloCache;
use super::deterministic::{ContributionTiming, deterministic_path_with_timing};
use super::engine::{
    CancelToken, MonteCarloRequest, check_run_count, run_monte_carlo_cancellable,
};
use super::error::{ForecastError, ForecastResult};
use super::metrics::{
    DEFAULT_HISTOGRAM_BINS, HistogramBin, MAX_HISTOGRAM_BINS, TerminalSummary, cagr, histogram,
    summarize_terminal,
};
use super::rates::apply_adjustments;
use super::types::{
    Adjustments, ModelKind, MonteCarloResult, PercentileSeries, PlanInputs, ReturnAssumption,
    TerminalDistribution, YearBalance,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub name: String,
    pub assumption: ReturnAssumption,
}

impl Scenario {
    pub fn new(name: impl Into<String>, mean_annual: f64, stdev_annual: f64) -> Self {
        Self {
            name: name.into(),
            assumption: ReturnAssumption::new(mean_annual, stdev_annual),
        }
    }

    pub fn defaults() -> Vec<Scenario> {
        vec![
            Scenario::new("Conservative", 0.05, 0.02),
            Scenario::new("Balanced", 0.08, 0.04),
            Scenario::new("Aggressive", 0.11, 0.15),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionRequest {
    pub plan: PlanInputs,
    pub scenarios: Vec<Scenario>,
    pub model: ModelKind,
    pub run_count: usize,
    /// Shared by every scenario's batch; `None` draws entropy per batch.
    pub seed: Option<u64>,
    pub adjustments: Adjustments,
    pub histogram_bins: usize,
}

impl ProjectionRequest {
    pub fn new(plan: PlanInputs) -> Self {
        Self {
            plan,
            scenarios: Scenario::defaults(),
            model: ModelKind::Lognormal,
            run_count: 2_000,
            seed: Some(42),
            adjustments: Adjustments::default(),
            histogram_bins: DEFAULT_HISTOGRAM_BINS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeterministicProjection {
    /// Contributions are invested at the start of each month, as in the simulator.
    pub timing: ContributionTiming,
    pub path: Vec<YearBalance>,
    pub final_balance: f64,
    pub cagr: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StochasticProjection {
    pub seed: u64,
    pub run_count: usize,
    pub percentiles: PercentileSeries,
    pub summary: TerminalSummary,
    pub median_cagr: Option<f64>,
    pub histogram: Vec<HistogramBin>,
    pub terminal: TerminalDistribution,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioReport {
    pub name: String,
    /// Assumption after fee and inflation adjustments.
    pub assumption: ReturnAssumption,
    pub deterministic: DeterministicProjection,
    /// Absent for scenarios without volatility.
    pub monte_carlo: Option<StochasticProjection>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionReport {
    pub plan: PlanInputs,
    pub model: ModelKind,
    pub run_count: usize,
    pub adjustments: Adjustments,
    pub scenarios: Vec<ScenarioReport>,
}

impl ProjectionReport {
    pub fn scenario(&self, name: &str) -> Option<&ScenarioReport> {
        self.scenarios
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }
}

/// Deterministic baseline for every scenario, plus a Monte Carlo batch for each
/// scenario with volatility.
pub fn project_scenarios(
    request: &ProjectionRequest,
    cancel: Option<&CancelToken>,
) -> ForecastResult<ProjectionReport> {
    project_with(request, None, cancel)
}

/// As [`project_scenarios`], serving seeded batches from `cache`.
pub fn project_scenarios_cached(
    request: &ProjectionRequest,
    cache: &MonteCarloCache,
    cancel: Option<&CancelToken>,
) -> ForecastResult<ProjectionReport> {
    project_with(request, Some(cache), cancel)
}

fn project_with(
    request: &ProjectionRequest,
    cache: Option<&MonteCarloCache>,
    cancel: Option<&CancelToken>,
) -> ForecastResult<ProjectionReport> {
    request.plan.validate()?;
    check_run_count(request.run_count, request.plan.horizon_years)?;
    if request.histogram_bins > MAX_HISTOGRAM_BINS {
        return Err(ForecastError::TooLarge {
            field: "histogram_bins",
            value: request.histogram_bins as u64,
            limit: MAX_HISTOGRAM_BINS as u64,
        });
    }
    let plan = request.plan;
    let timing = ContributionTiming::StartOfMonth;
    let years = f64::from(plan.horizon_years);

    let mut scenarios = Vec::with_capacity(request.scenarios.len());
    for scenario in &request.scenarios {
        let assumption = apply_adjustments(scenario.assumption, &request.adjustments)?;

        let path = deterministic_path_with_timing(&plan, assumption.mean_annual, timing)?;
        let final_balance = path.last().map_or(plan.starting_balance, |p| p.balance);
        let deterministic = DeterministicProjection {
            timing,
            cagr: cagr(plan.starting_balance, final_balance, years),
            final_balance,
            path,
        };

        let monte_carlo = if assumption.is_volatile() {
            let mc_request = MonteCarloRequest {
                run_count: request.run_count,
                plan,
                assumption,
                model: request.model,
                seed: request.seed,
            };
            let result = match cache {
                Some(cache) => cache.run_cancellable(&mc_request, cancel)?,
                None => Arc::new(run_monte_carlo_cancellable(&mc_request, cancel)?),
            };
            Some(stochastic_projection(&plan, &result, request.histogram_bins))
        } else {
            debug!(scenario = %scenario.name, "no volatility, skipping monte carlo");
            None
        };

        scenarios.push(ScenarioReport {
            name: scenario.name.clone(),
            assumption,
            deterministic,
            monte_carlo,
        });
    }

    Ok(ProjectionReport {
        plan,
        model: request.model,
        run_count: request.run_count,
        adjustments: request.adjustments,
        scenarios,
    })
}

fn stochastic_projection(
    plan: &PlanInputs,
    result: &MonteCarloResult,
    bins: usize,
) -> StochasticProjection {
    // Batches always hold at least one run, so the summary is present.
    let summary = summarize_terminal(&result.terminal).unwrap_or_default();
    StochasticProjection {
        seed: result.seed,
        run_count: result.run_count,
        percentiles: result.percentiles.clone(),
        median_cagr: cagr(
            plan.starting_balance,
            summary.median,
            f64::from(plan.horizon_years),
        ),
        histogram: histogram(result.terminal.values(), bins),
        terminal: result.terminal.clone(),
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_request() -> ProjectionRequest {
        let mut request = ProjectionRequest::new(PlanInputs {
            starting_balance: 5_000.0,
            monthly_contribution: 300.0,
            horizon_years: 10,
        });
        request.run_count = 200;
        request
    }

    #[test]
    fn defaults_mirror_the_three_standard_scenarios() {
        let names: Vec<String> = Scenario::defaults().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["Conservative", "Balanced", "Aggressive"]);
    }

    #[test]
    fn every_scenario_gets_a_deterministic_baseline() {
        let report = project_scenarios(&small_request(), None).expect("valid");
        assert_eq!(report.scenarios.len(), 3);
        for scenario in &report.scenarios {
            assert_eq!(scenario.deterministic.path.len(), 10);
            assert_eq!(
                scenario.deterministic.final_balance,
                scenario.deterministic.path[9].balance
            );
            assert!(scenario.deterministic.cagr.is_some());
            let mc = scenario.monte_carlo.as_ref().expect("volatile scenario");
            assert_eq!(mc.seed, 42);
            assert_eq!(mc.percentiles.len(), 10);
            assert_eq!(mc.terminal.len(), 200);
            assert_eq!(mc.histogram.len(), DEFAULT_HISTOGRAM_BINS);
            assert_eq!(mc.summary.median, mc.percentiles.last().expect("row").p50);
        }
    }

    #[test]
    fn zero_volatility_scenarios_skip_monte_carlo() {
        let mut request = small_request();
        request.scenarios = vec![Scenario::new("Flat", 0.04, 0.0)];
        let report = project_scenarios(&request, None).expect("valid");
        assert!(report.scenarios[0].monte_carlo.is_none());
    }

    #[test]
    fn adjustments_flow_into_the_reported_assumption() {
        let mut request = small_request();
        request.scenarios = vec![Scenario::new("Net", 0.10, 0.0)];
        request.adjustments = Adjustments {
            annual_fee: 0.01,
            inflation: 0.02,
            real_terms: true,
        };
        let report = project_scenarios(&request, None).expect("valid");
        let mean = report.scenarios[0].assumption.mean_annual;
        assert!((mean - (1.10 * 0.99 / 1.02 - 1.0)).abs() < 1e-12);
    }

    #[test]
    fn cache_is_consulted_for_seeded_batches() {
        let cache = MonteCarloCache::default();
        let request = small_request();
        let first = project_scenarios_cached(&request, &cache, None).expect("valid");
        let second = project_scenarios_cached(&request, &cache, None).expect("valid");
        assert_eq!(first, second);
        assert_eq!(cache.misses(), 3);
        assert_eq!(cache.hits(), 3);
    }

    #[test]
    fn cancellation_aborts_the_whole_projection() {
        let token = CancelToken::new();
        token.cancel();
        let outcome = project_scenarios(&small_request(), Some(&token));
        assert_eq!(outcome, Err(ForecastError::Cancelled));
    }

    #[test]
    fn zero_runs_are_rejected_even_without_volatility() {
        let mut request = small_request();
        request.scenarios = vec![Scenario::new("Flat", 0.04, 0.0)];
        request.run_count = 0;
        assert_eq!(
            project_scenarios(&request, None),
            Err(ForecastError::InvalidHorizon {
                field: "run_count",
                value: 0
            })
        );
    }

    #[test]
    fn oversized_requests_are_rejected_up_front() {
        let mut request = small_request();
        request.scenarios = vec![Scenario::new("Flat", 0.04, 0.0)];
        request.run_count = usize::MAX;
        assert!(matches!(
            project_scenarios(&request, None),
            Err(ForecastError::TooLarge { field: "run_count", .. })
        ));

        let mut request = small_request();
        request.histogram_bins = MAX_HISTOGRAM_BINS + 1;
        assert!(matches!(
            project_scenarios(&request, None),
            Err(ForecastError::TooLarge { field: "histogram_bins", .. })
        ));
    }

    #[test]
    fn lookup_by_name_ignores_case() {
        let report = project_scenarios(&small_request(), None).expect("valid");
        assert!(report.scenario("aggressive").is_some());
        assert!(report.scenario("missing").is_none());
    }

    #[test]
    fn report_serializes_camel_case() {
        let mut request = small_request();
        request.run_count = 20;
        let report = project_scenarios(&request, None).expect("valid");
        let json = serde_json::to_string(&report).expect("serialize");
        assert!(json.contains("\"startingBalance\""));
        assert!(json.contains("\"monteCarlo\""));
        assert!(json.contains("\"medianCagr\""));
        assert!(json.contains("\"finalBalance\""));
        assert!(json.contains("\"p95\""));
        assert!(json.contains("\"timing\":\"start-of-month\""));
    }
}
