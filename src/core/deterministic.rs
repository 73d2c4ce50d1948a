use serde::Serialize;

use super::error::ForecastResult;
use super::rates::annual_to_monthly_return;
use super::types::{MONTHS_PER_YEAR, PlanInputs, YearBalance};

/// When the monthly contribution lands relative to that month's growth.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContributionTiming {
    /// Contribution is invested before the month's return is applied (annuity due).
    /// Matches the stochastic simulator.
    #[default]
    StartOfMonth,
    /// Contribution arrives after the month's return (ordinary annuity).
    EndOfMonth,
}

/// Closed-form compounding path with no volatility, sampled at each year end.
pub fn deterministic_path(
    plan: &PlanInputs,
    mean_annual: f64,
) -> ForecastResult<Vec<YearBalance>> {
    deterministic_path_with_timing(plan, mean_annual, ContributionTiming::StartOfMonth)
}

pub fn deterministic_path_with_timing(
    plan: &PlanInputs,
    mean_annual: f64,
    timing: ContributionTiming,
) -> ForecastResult<Vec<YearBalance>> {
    plan.validate()?;
    let g = annual_to_monthly_return(mean_annual)?;

    let path = (1..=plan.horizon_years)
        .map(|year| YearBalance {
            year,
            balance: balance_at_month(plan, g, year as usize * MONTHS_PER_YEAR, timing),
        })
        .collect();
    Ok(path)
}

fn balance_at_month(plan: &PlanInputs, g: f64, t: usize, timing: ContributionTiming) -> f64 {
    let t_f = t as f64;
    if g == 0.0 {
        return plan.starting_balance + plan.monthly_contribution * t_f;
    }

    // (1+g)^t - 1 without cancellation for small g.
    let growth_minus_one = (t_f * g.ln_1p()).exp_m1();
    let growth = 1.0 + growth_minus_one;
    let annuity = plan.monthly_contribution * growth_minus_one / g;
    let annuity = match timing {
        ContributionTiming::StartOfMonth => annuity * (1.0 + g),
        ContributionTiming::EndOfMonth => annuity,
    };
    plan.starting_balance * growth + annuity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ForecastError;
    use proptest::prelude::{prop_assert, proptest};

    fn assert_rel(actual: f64, expected: f64, rel: f64) {
        let tol = rel * expected.abs().max(1.0);
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn plan(starting: f64, monthly: f64, years: u32) -> PlanInputs {
        PlanInputs {
            starting_balance: starting,
            monthly_contribution: monthly,
            horizon_years: years,
        }
    }

    fn recursive_path(plan: &PlanInputs, g: f64, timing: ContributionTiming) -> Vec<f64> {
        let mut balance = plan.starting_balance;
        let mut out = Vec::new();
        for month in 1..=plan.months() {
            balance = match timing {
                ContributionTiming::StartOfMonth => (balance + plan.monthly_contribution) * (1.0 + g),
                ContributionTiming::EndOfMonth => balance * (1.0 + g) + plan.monthly_contribution,
            };
            if month % MONTHS_PER_YEAR == 0 {
                out.push(balance);
            }
        }
        out
    }

    #[test]
    fn one_row_per_year_numbered_from_one() {
        let path = deterministic_path(&plan(1_000.0, 10.0, 5), 0.05).expect("valid");
        let years: Vec<u32> = path.iter().map(|p| p.year).collect();
        assert_eq!(years, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn zero_growth_is_linear_exactly() {
        let p = plan(5_000.0, 300.0, 20);
        for timing in [ContributionTiming::StartOfMonth, ContributionTiming::EndOfMonth] {
            let path = deterministic_path_with_timing(&p, 0.0, timing).expect("valid");
            for row in &path {
                let t = row.year as f64 * 12.0;
                assert_eq!(row.balance, 5_000.0 + 300.0 * t);
            }
        }
    }

    #[test]
    fn reference_scenario_matches_monthly_recursion() {
        // starting 5000, 300/month, 20 years at 8%.
        let p = plan(5_000.0, 300.0, 20);
        let g = annual_to_monthly_return(0.08).expect("valid");
        for timing in [ContributionTiming::StartOfMonth, ContributionTiming::EndOfMonth] {
            let path = deterministic_path_with_timing(&p, 0.08, timing).expect("valid");
            let expected = recursive_path(&p, g, timing);
            for (row, want) in path.iter().zip(expected) {
                assert_rel(row.balance, want, 1e-10);
            }
        }

        let end = deterministic_path(&p, 0.08).expect("valid");
        let growth = 1.08f64.powi(20);
        let closed = 5_000.0 * growth + 300.0 * (1.0 + g) * (growth - 1.0) / g;
        assert_rel(end[19].balance, closed, 1e-10);
        // Sanity bound: 5000 * 1.08^20 is about 23_304.79 and contributions add ~171k.
        assert!(end[19].balance > 190_000.0 && end[19].balance < 200_000.0);
    }

    #[test]
    fn ordinary_annuity_trails_annuity_due_by_one_month_of_growth() {
        let p = plan(0.0, 100.0, 3);
        let due = deterministic_path(&p, 0.06).expect("valid");
        let ordinary =
            deterministic_path_with_timing(&p, 0.06, ContributionTiming::EndOfMonth).expect("valid");
        let g = annual_to_monthly_return(0.06).expect("valid");
        for (a, b) in due.iter().zip(&ordinary) {
            assert_rel(a.balance, b.balance * (1.0 + g), 1e-12);
        }
    }

    #[test]
    fn rejects_invalid_inputs() {
        assert!(matches!(
            deterministic_path(&plan(1.0, 1.0, 0), 0.05),
            Err(ForecastError::InvalidHorizon { .. })
        ));
        assert!(matches!(
            deterministic_path(&plan(1.0, 1.0, 5), -1.0),
            Err(ForecastError::InvalidAssumption { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_higher_mean_strictly_raises_every_year(
            starting in 0u32..1_000_000,
            monthly in 0u32..10_000,
            years in 1u32..40,
            mean_bp in -5_000i32..3_000,
            bump_bp in 1i32..500,
        ) {
            // A strict increase needs something to grow.
            let starting = starting as f64 + 1.0;
            let p = plan(starting, monthly as f64, years);
            let low = deterministic_path(&p, mean_bp as f64 / 10_000.0).expect("valid");
            let high = deterministic_path(&p, (mean_bp + bump_bp) as f64 / 10_000.0).expect("valid");
            for (l, h) in low.iter().zip(&high) {
                prop_assert!(h.balance > l.balance, "year {}: {} !> {}", l.year, h.balance, l.balance);
            }
        }
    }
}
