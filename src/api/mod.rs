mod export;

use axum::{
    Router,
    extract::{Json, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::{
    Adjustments, CancelToken, DEFAULT_HISTOGRAM_BINS, MAX_HISTOGRAM_BINS, MAX_HORIZON_YEARS,
    ModelKind, MonteCarloCache, PlanInputs, ProjectionReport, ProjectionRequest, Scenario,
    ScenarioReport, project_scenarios, project_scenarios_cached,
};

pub use export::{PERCENTILE_HEADER, percentiles_csv, render_table, report_csv};

/// Upper bound on `--runs` and the `runs` payload field.
pub const MAX_RUNS: usize = 20_000;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliModel {
    Lognormal,
    Normal,
}

impl From<CliModel> for ModelKind {
    fn from(value: CliModel) -> Self {
        match value {
            CliModel::Lognormal => ModelKind::Lognormal,
            CliModel::Normal => ModelKind::Normal,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiModel {
    #[serde(alias = "log-normal", alias = "logNormal", alias = "log_normal")]
    Lognormal,
    #[serde(alias = "gaussian")]
    Normal,
}

impl From<ApiModel> for CliModel {
    fn from(value: ApiModel) -> Self {
        match value {
            ApiModel::Lognormal => CliModel::Lognormal,
            ApiModel::Normal => CliModel::Normal,
        }
    }
}

/// Scenario as typed on the command line: `NAME:MEAN:STDEV`, rates in percent.
#[derive(Clone, Debug, PartialEq)]
struct CliScenario {
    name: String,
    mean: f64,
    stdev: f64,
}

fn parse_scenario_arg(raw: &str) -> Result<CliScenario, String> {
    let mut parts = raw.rsplitn(3, ':');
    let (Some(stdev), Some(mean), Some(name)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("expected NAME:MEAN:STDEV, got '{raw}'"));
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("scenario name is empty in '{raw}'"));
    }
    let mean = mean
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid mean '{mean}': {e}"))?;
    let stdev = stdev
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid stdev '{stdev}': {e}"))?;
    Ok(CliScenario {
        name: name.to_string(),
        mean,
        stdev,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiScenario {
    name: String,
    mean: f64,
    stdev: f64,
}

impl From<ApiScenario> for CliScenario {
    fn from(value: ApiScenario) -> Self {
        CliScenario {
            name: value.name,
            mean: value.mean,
            stdev: value.stdev,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ForecastPayload {
    starting_balance: Option<f64>,
    monthly_contribution: Option<f64>,
    years: Option<u32>,
    runs: Option<usize>,
    seed: Option<u64>,
    model: Option<ApiModel>,
    annual_fee: Option<f64>,
    inflation: Option<f64>,
    real_terms: Option<bool>,
    histogram_bins: Option<usize>,
    scenarios: Option<Vec<ApiScenario>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ScenarioSelector {
    scenario: Option<String>,
}

#[derive(Parser, Debug)]
#[command(
    name = "forecast",
    about = "Monte Carlo savings projection with deterministic baselines"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Project a savings plan under one or more return scenarios.
    Project(ProjectArgs),
    /// Serve the projection API over HTTP.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[derive(Args, Debug, Clone)]
struct ProjectArgs {
    #[arg(long, default_value_t = 5000.0)]
    starting_balance: f64,
    #[arg(long, default_value_t = 300.0)]
    monthly_contribution: f64,
    #[arg(long, default_value_t = 20, help = "Projection horizon in years")]
    years: u32,
    #[arg(long, default_value_t = 2000, help = "Monte Carlo runs per scenario")]
    runs: usize,
    #[arg(long, default_value_t = 42, help = "Random seed; 0 draws a fresh seed")]
    seed: u64,
    #[arg(long, value_enum, default_value_t = CliModel::Lognormal)]
    model: CliModel,
    #[arg(
        long = "scenario",
        value_parser = parse_scenario_arg,
        help = "Scenario as NAME:MEAN:STDEV in percent, e.g. Balanced:8:4; repeatable"
    )]
    scenarios: Vec<CliScenario>,
    #[arg(long, default_value_t = 0.0, help = "Annual fee in percent")]
    annual_fee: f64,
    #[arg(long, default_value_t = 2.0, help = "Annual inflation in percent")]
    inflation: f64,
    #[arg(long, help = "Report balances in today's money")]
    real_terms: bool,
    #[arg(long, default_value_t = DEFAULT_HISTOGRAM_BINS)]
    histogram_bins: usize,
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn build_request(args: ProjectArgs) -> Result<ProjectionRequest, String> {
    if args.years == 0 {
        return Err("--years must be >= 1".to_string());
    }

    if args.years > MAX_HORIZON_YEARS {
        return Err(format!("--years must be <= {MAX_HORIZON_YEARS}"));
    }

    if args.runs == 0 {
        return Err("--runs must be > 0".to_string());
    }

    if args.runs > MAX_RUNS {
        return Err(format!("--runs must be <= {MAX_RUNS}"));
    }

    if !args.starting_balance.is_finite() || args.starting_balance < 0.0 {
        return Err("--starting-balance must be >= 0".to_string());
    }

    if !args.monthly_contribution.is_finite() || args.monthly_contribution < 0.0 {
        return Err("--monthly-contribution must be >= 0".to_string());
    }

    if !(0.0..100.0).contains(&args.annual_fee) {
        return Err("--annual-fee must be >= 0 and < 100".to_string());
    }

    if !args.inflation.is_finite() || args.inflation <= -100.0 {
        return Err("--inflation must be > -100".to_string());
    }

    if args.histogram_bins == 0 {
        return Err("--histogram-bins must be > 0".to_string());
    }

    if args.histogram_bins > MAX_HISTOGRAM_BINS {
        return Err(format!("--histogram-bins must be <= {MAX_HISTOGRAM_BINS}"));
    }

    let scenarios = if args.scenarios.is_empty() {
        Scenario::defaults()
    } else {
        let mut scenarios = Vec::with_capacity(args.scenarios.len());
        for scenario in args.scenarios {
            if !scenario.mean.is_finite() || scenario.mean <= -100.0 {
                return Err(format!(
                    "--scenario {}: mean must be > -100",
                    scenario.name
                ));
            }
            if !scenario.stdev.is_finite() || scenario.stdev < 0.0 {
                return Err(format!("--scenario {}: stdev must be >= 0", scenario.name));
            }
            if scenarios
                .iter()
                .any(|s: &Scenario| s.name.eq_ignore_ascii_case(&scenario.name))
            {
                return Err(format!("--scenario {} is given twice", scenario.name));
            }
            scenarios.push(Scenario::new(
                scenario.name,
                scenario.mean / 100.0,
                scenario.stdev / 100.0,
            ));
        }
        scenarios
    };

    Ok(ProjectionRequest {
        plan: PlanInputs {
            starting_balance: args.starting_balance,
            monthly_contribution: args.monthly_contribution,
            horizon_years: args.years,
        },
        scenarios,
        model: args.model.into(),
        run_count: args.runs,
        seed: (args.seed != 0).then_some(args.seed),
        adjustments: Adjustments {
            annual_fee: args.annual_fee / 100.0,
            inflation: args.inflation / 100.0,
            real_terms: args.real_terms,
        },
        histogram_bins: args.histogram_bins,
    })
}

pub async fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Command::Project(args) => run_project(args),
        Command::Serve { port } => run_http_server(port)
            .await
            .map_err(|e| format!("Server error: {e}")),
    }
}

fn run_project(args: ProjectArgs) -> Result<(), String> {
    let format = args.format;
    let request = build_request(args)?;
    let report = project_scenarios(&request, None).map_err(|e| e.to_string())?;
    let rendered = match format {
        OutputFormat::Table => render_table(&report),
        OutputFormat::Json => serde_json::to_string_pretty(&report)
            .map_err(|e| format!("Failed to serialize report: {e}"))?,
        OutputFormat::Csv => report_csv(&report)?,
    };
    println!("{}", rendered.trim_end());
    Ok(())
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(Arc::new(MonteCarloCache::default()));

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "forecast HTTP API listening");

    axum::serve(listener, app).await
}

fn router(cache: Arc<MonteCarloCache>) -> Router {
    Router::new()
        .route(
            "/api/forecast",
            get(forecast_get_handler).post(forecast_post_handler),
        )
        .route(
            "/api/forecast/percentiles.csv",
            get(percentiles_get_handler).post(percentiles_post_handler),
        )
        .fallback(not_found_handler)
        .with_state(cache)
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn forecast_get_handler(
    State(cache): State<Arc<MonteCarloCache>>,
    Query(payload): Query<ForecastPayload>,
) -> Response {
    forecast_handler_impl(cache, payload).await
}

async fn forecast_post_handler(
    State(cache): State<Arc<MonteCarloCache>>,
    Json(payload): Json<ForecastPayload>,
) -> Response {
    forecast_handler_impl(cache, payload).await
}

async fn forecast_handler_impl(cache: Arc<MonteCarloCache>, payload: ForecastPayload) -> Response {
    match project_payload(cache, payload).await {
        Ok(report) => json_response(StatusCode::OK, report),
        Err(response) => response,
    }
}

async fn percentiles_get_handler(
    State(cache): State<Arc<MonteCarloCache>>,
    Query(selector): Query<ScenarioSelector>,
    Query(payload): Query<ForecastPayload>,
) -> Response {
    percentiles_handler_impl(cache, selector, payload).await
}

async fn percentiles_post_handler(
    State(cache): State<Arc<MonteCarloCache>>,
    Query(selector): Query<ScenarioSelector>,
    Json(payload): Json<ForecastPayload>,
) -> Response {
    percentiles_handler_impl(cache, selector, payload).await
}

async fn percentiles_handler_impl(
    cache: Arc<MonteCarloCache>,
    selector: ScenarioSelector,
    payload: ForecastPayload,
) -> Response {
    let report = match project_payload(cache, payload).await {
        Ok(report) => report,
        Err(response) => return response,
    };

    let csv = select_stochastic_scenario(&report, selector.scenario.as_deref()).and_then(|scenario| {
        let mc = scenario.monte_carlo.as_ref().ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                format!("Scenario {} has no volatility", scenario.name),
            )
        })?;
        percentiles_csv(&mc.percentiles).map_err(|msg| (StatusCode::INTERNAL_SERVER_ERROR, msg))
    });

    match csv {
        Ok(body) => with_cache_control((
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"percentiles.csv\"",
                ),
            ],
            body,
        )),
        Err((status, msg)) => error_response(status, &msg),
    }
}

/// Named scenario, or the first one with a Monte Carlo section when no name is given.
fn select_stochastic_scenario<'a>(
    report: &'a ProjectionReport,
    name: Option<&str>,
) -> Result<&'a ScenarioReport, (StatusCode, String)> {
    match name {
        Some(name) => report
            .scenario(name)
            .ok_or((StatusCode::NOT_FOUND, format!("Unknown scenario: {name}"))),
        None => report
            .scenarios
            .iter()
            .find(|s| s.monte_carlo.is_some())
            .ok_or((
                StatusCode::BAD_REQUEST,
                "No scenario has volatility".to_string(),
            )),
    }
}

/// Cancels the projection if the request future is dropped before it completes.
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

async fn project_payload(
    cache: Arc<MonteCarloCache>,
    payload: ForecastPayload,
) -> Result<ProjectionReport, Response> {
    let request = request_from_payload(payload)
        .map_err(|msg| error_response(StatusCode::BAD_REQUEST, &msg))?;

    let token = CancelToken::new();
    let _guard = CancelOnDrop(token.clone());
    let task = tokio::task::spawn_blocking(move || {
        project_scenarios_cached(&request, &cache, Some(&token))
    });

    match task.await {
        Ok(Ok(report)) => Ok(report),
        Ok(Err(err)) => Err(error_response(StatusCode::BAD_REQUEST, &err.to_string())),
        Err(err) => {
            warn!("projection task failed: {err}");
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Projection failed",
            ))
        }
    }
}

fn with_cache_control<R: IntoResponse>(response: R) -> Response {
    let mut response = response.into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    with_cache_control((status, Json(body)))
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn request_from_json(json: &str) -> Result<ProjectionRequest, String> {
    let payload = serde_json::from_str::<ForecastPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    request_from_payload(payload)
}

fn request_from_payload(payload: ForecastPayload) -> Result<ProjectionRequest, String> {
    let mut args = default_args_for_api();

    if let Some(v) = payload.starting_balance {
        args.starting_balance = v;
    }
    if let Some(v) = payload.monthly_contribution {
        args.monthly_contribution = v;
    }
    if let Some(v) = payload.years {
        args.years = v;
    }
    if let Some(v) = payload.runs {
        args.runs = v;
    }
    if let Some(v) = payload.seed {
        args.seed = v;
    }
    if let Some(v) = payload.model {
        args.model = v.into();
    }
    if let Some(v) = payload.annual_fee {
        args.annual_fee = v;
    }
    if let Some(v) = payload.inflation {
        args.inflation = v;
    }
    if let Some(v) = payload.real_terms {
        args.real_terms = v;
    }
    if let Some(v) = payload.histogram_bins {
        args.histogram_bins = v;
    }
    if let Some(v) = payload.scenarios {
        args.scenarios = v.into_iter().map(CliScenario::from).collect();
    }

    build_request(args)
}

fn default_args_for_api() -> ProjectArgs {
    ProjectArgs {
        starting_balance: 5_000.0,
        monthly_contribution: 300.0,
        years: 20,
        runs: 2_000,
        seed: 42,
        model: CliModel::Lognormal,
        scenarios: Vec::new(),
        annual_fee: 0.0,
        inflation: 2.0,
        real_terms: false,
        histogram_bins: DEFAULT_HISTOGRAM_BINS,
        format: OutputFormat::Json,
    }
}
