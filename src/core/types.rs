use serde::Serialize;

use super::error::{ForecastError, ForecastResult};

pub const MONTHS_PER_YEAR: usize = 12;

/// Longest horizon a plan may project.
pub const MAX_HORIZON_YEARS: u32 = 100;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Log-normally distributed monthly multipliers; balances stay non-negative.
    Lognormal,
    /// Additive normal monthly returns; a month can lose more than 100%.
    Normal,
}

impl ModelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::Lognormal => "lognormal",
            ModelKind::Normal => "normal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanInputs {
    pub starting_balance: f64,
    pub monthly_contribution: f64,
    pub horizon_years: u32,
}

impl PlanInputs {
    pub fn months(&self) -> usize {
        self.horizon_years as usize * MONTHS_PER_YEAR
    }

    pub fn validate(&self) -> ForecastResult<()> {
        if self.horizon_years < 1 {
            return Err(ForecastError::InvalidHorizon {
                field: "horizon_years",
                value: u64::from(self.horizon_years),
            });
        }
        if self.horizon_years > MAX_HORIZON_YEARS {
            return Err(ForecastError::TooLarge {
                field: "horizon_years",
                value: u64::from(self.horizon_years),
                limit: u64::from(MAX_HORIZON_YEARS),
            });
        }
        for (field, value) in [
            ("starting_balance", self.starting_balance),
            ("monthly_contribution", self.monthly_contribution),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ForecastError::InvalidPlan {
                    field,
                    value,
                    reason: "must be a finite amount >= 0",
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnAssumption {
    pub mean_annual: f64,
    pub stdev_annual: f64,
}

impl ReturnAssumption {
    pub fn new(mean_annual: f64, stdev_annual: f64) -> Self {
        Self {
            mean_annual,
            stdev_annual,
        }
    }

    pub fn is_volatile(&self) -> bool {
        self.stdev_annual > 0.0
    }
}

/// Fee drag and inflation applied to a [`ReturnAssumption`] before projecting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Adjustments {
    /// Fraction of each year's growth factor lost to fees, in `[0, 1)`.
    pub annual_fee: f64,
    pub inflation: f64,
    /// Deflate the mean return by `inflation` so balances read in today's money.
    pub real_terms: bool,
}

impl Default for Adjustments {
    fn default() -> Self {
        Self {
            annual_fee: 0.0,
            inflation: 0.02,
            real_terms: false,
        }
    }
}

/// Year-end balance of the deterministic projection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearBalance {
    pub year: u32,
    pub balance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentileRow {
    pub year: u32,
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
}

/// Per-year percentile bands of year-end balance across every run of one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PercentileSeries {
    rows: Vec<PercentileRow>,
}

impl PercentileSeries {
    pub(crate) fn from_rows(rows: Vec<PercentileRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[PercentileRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn year(&self, year: u32) -> Option<&PercentileRow> {
        self.rows.iter().find(|row| row.year == year)
    }

    pub fn last(&self) -> Option<&PercentileRow> {
        self.rows.last()
    }
}

/// Final-year balance of every run, in run order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TerminalDistribution {
    values: Vec<f64>,
}

impl TerminalDistribution {
    pub(crate) fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloResult {
    /// Seed the batch actually ran with; equal to the requested seed when one was given.
    pub seed: u64,
    pub run_count: usize,
    pub model: ModelKind,
    pub percentiles: PercentileSeries,
    pub terminal: TerminalDistribution,
}
