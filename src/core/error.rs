use thiserror::Error;

/// Failures the engine reports before (or instead of) producing a projection.
///
/// A non-applicable CAGR is not an error; see [`crate::core::cagr`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ForecastError {
    #[error("Invalid assumption: {field} = {value} ({reason})")]
    InvalidAssumption {
        field: &'static str,
        value: f64,
        reason: &'static str,
    },

    #[error("Invalid horizon: {field} = {value} (must be >= 1)")]
    InvalidHorizon { field: &'static str, value: u64 },

    #[error("Invalid plan: {field} = {value} ({reason})")]
    InvalidPlan {
        field: &'static str,
        value: f64,
        reason: &'static str,
    },

    #[error("Too large: {field} = {value} (limit {limit})")]
    TooLarge {
        field: &'static str,
        value: u64,
        limit: u64,
    },

    #[error("Monte Carlo batch cancelled")]
    Cancelled,
}

pub type ForecastResult<T> = Result<T, ForecastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_input() {
        let err = ForecastError::InvalidAssumption {
            field: "mean_annual",
            value: -1.5,
            reason: "annual return must be greater than -100%",
        };
        let msg = err.to_string();
        assert!(msg.contains("mean_annual"));
        assert!(msg.contains("-1.5"));

        let err = ForecastError::InvalidHorizon {
            field: "run_count",
            value: 0,
        };
        assert_eq!(err.to_string(), "Invalid horizon: run_count = 0 (must be >= 1)");

        let err = ForecastError::TooLarge {
            field: "horizon_years",
            value: 1_000,
            limit: 100,
        };
        assert_eq!(err.to_string(), "Too large: horizon_years = 1000 (limit 100)");
    }
}
