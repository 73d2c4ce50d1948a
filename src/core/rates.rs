//! Annual-to-monthly conversions for return statistics.
//!
//! Volatility scaling uses the square-root-of-time rule, which assumes monthly
//! shocks are independent and identically distributed. It is an approximation and
//! understates dispersion for autocorrelated return series.

use super::error::{ForecastError, ForecastResult};
use super::types::{Adjustments, MONTHS_PER_YEAR, ReturnAssumption};

const MONTHS: f64 = MONTHS_PER_YEAR as f64;

/// Monthly rate that compounds to `annual_return` over twelve months.
pub fn annual_to_monthly_return(annual_return: f64) -> ForecastResult<f64> {
    check_growth_base("mean_annual", annual_return)?;
    Ok((1.0 + annual_return).powf(1.0 / MONTHS) - 1.0)
}

pub fn annual_std_to_monthly(annual_std: f64) -> f64 {
    annual_std / MONTHS.sqrt()
}

/// Monthly drift in log space, `ln(1 + annual) / 12`.
pub fn monthly_log_drift(annual_return: f64) -> ForecastResult<f64> {
    check_growth_base("mean_annual", annual_return)?;
    Ok(annual_return.ln_1p() / MONTHS)
}

pub fn validate_assumption(assumption: &ReturnAssumption) -> ForecastResult<()> {
    check_growth_base("mean_annual", assumption.mean_annual)?;
    if !assumption.stdev_annual.is_finite() || assumption.stdev_annual < 0.0 {
        return Err(ForecastError::InvalidAssumption {
            field: "stdev_annual",
            value: assumption.stdev_annual,
            reason: "volatility must be a finite value >= 0",
        });
    }
    Ok(())
}

/// Net the mean return of fees and, in real terms, of inflation. Volatility is untouched.
pub fn apply_adjustments(
    assumption: ReturnAssumption,
    adjustments: &Adjustments,
) -> ForecastResult<ReturnAssumption> {
    validate_assumption(&assumption)?;
    if !(0.0..1.0).contains(&adjustments.annual_fee) {
        return Err(ForecastError::InvalidAssumption {
            field: "annual_fee",
            value: adjustments.annual_fee,
            reason: "fee must be in [0, 1)",
        });
    }

    let mut mean = assumption.mean_annual;
    if adjustments.annual_fee > 0.0 {
        mean = (1.0 + mean) * (1.0 - adjustments.annual_fee) - 1.0;
    }
    if adjustments.real_terms {
        check_growth_base("inflation", adjustments.inflation)?;
        mean = (1.0 + mean) / (1.0 + adjustments.inflation) - 1.0;
    }

    Ok(ReturnAssumption {
        mean_annual: mean,
        stdev_annual: assumption.stdev_annual,
    })
}

fn check_growth_base(field: &'static str, rate: f64) -> ForecastResult<()> {
    if !rate.is_finite() || rate <= -1.0 {
        return Err(ForecastError::InvalidAssumption {
            field,
            value: rate,
            reason: "annual rate must be finite and greater than -100%",
        });
    }
    Ok(())
}
