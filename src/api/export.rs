use crate::core::{
    ContributionTiming, PercentileRow, PercentileSeries, ProjectionReport, ScenarioReport,
};

pub const PERCENTILE_HEADER: [&str; 6] = ["year", "p5", "p25", "p50", "p75", "p95"];

/// One scenario's percentile table, balances rounded to cents.
pub fn percentiles_csv(series: &PercentileSeries) -> Result<String, String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(PERCENTILE_HEADER).map_err(csv_error)?;
    for row in series.rows() {
        writer.write_record(percentile_record(row)).map_err(csv_error)?;
    }
    finish(writer)
}

/// Percentile tables of every stochastic scenario, keyed by a leading `scenario` column.
pub fn report_csv(report: &ProjectionReport) -> Result<String, String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(std::iter::once("scenario").chain(PERCENTILE_HEADER))
        .map_err(csv_error)?;
    for scenario in &report.scenarios {
        let Some(mc) = &scenario.monte_carlo else {
            continue;
        };
        for row in mc.percentiles.rows() {
            writer
                .write_record(std::iter::once(scenario.name.clone()).chain(percentile_record(row)))
                .map_err(csv_error)?;
        }
    }
    finish(writer)
}

pub fn render_table(report: &ProjectionReport) -> String {
    let plan = &report.plan;
    let adjustments = &report.adjustments;
    let mut lines = vec![
        format!(
            "Plan: starting {}, monthly {}, {} years, {} model, {} runs",
            format_money(plan.starting_balance),
            format_money(plan.monthly_contribution),
            plan.horizon_years,
            report.model.as_str(),
            report.run_count,
        ),
        format!(
            "Adjustments: fee {}, inflation {}, {} terms",
            format_rate(Some(adjustments.annual_fee)),
            format_rate(Some(adjustments.inflation)),
            if adjustments.real_terms { "real" } else { "nominal" },
        ),
    ];

    for scenario in &report.scenarios {
        lines.push(String::new());
        lines.extend(scenario_lines(scenario));
    }
    lines.join("\n")
}

fn scenario_lines(scenario: &ScenarioReport) -> Vec<String> {
    let deterministic = &scenario.deterministic;
    let mut lines = vec![
        format!(
            "{} (mean {}, stdev {})",
            scenario.name,
            format_rate(Some(scenario.assumption.mean_annual)),
            format_rate(Some(scenario.assumption.stdev_annual)),
        ),
        format!(
            "  Deterministic final: {}  CAGR {}  (contributions at {})",
            format_money(deterministic.final_balance),
            format_rate(deterministic.cagr),
            timing_label(deterministic.timing),
        ),
    ];

    match &scenario.monte_carlo {
        Some(mc) => {
            lines.push(format!(
                "  Monte Carlo median: {}  5-95%: {} to {}  median CAGR {}  seed {}",
                format_money(mc.summary.median),
                format_money(mc.summary.p5),
                format_money(mc.summary.p95),
                format_rate(mc.median_cagr),
                mc.seed,
            ));
            lines.push(format!(
                "  {:>4} {:>16} {:>16} {:>16} {:>16} {:>16} {:>16}",
                "year", "deterministic", "p5", "p25", "p50", "p75", "p95"
            ));
            for (point, row) in deterministic.path.iter().zip(mc.percentiles.rows()) {
                lines.push(format!(
                    "  {:>4} {:>16} {:>16} {:>16} {:>16} {:>16} {:>16}",
                    point.year,
                    format_money(point.balance),
                    format_money(row.p5),
                    format_money(row.p25),
                    format_money(row.p50),
                    format_money(row.p75),
                    format_money(row.p95),
                ));
            }
        }
        None => {
            lines.push(format!("  {:>4} {:>16}", "year", "deterministic"));
            for point in &deterministic.path {
                lines.push(format!("  {:>4} {:>16}", point.year, format_money(point.balance)));
            }
        }
    }
    lines
}

fn timing_label(timing: ContributionTiming) -> &'static str {
    match timing {
        ContributionTiming::StartOfMonth => "start of month",
        ContributionTiming::EndOfMonth => "end of month",
    }
}

fn percentile_record(row: &PercentileRow) -> [String; 6] {
    [
        row.year.to_string(),
        cents(row.p5),
        cents(row.p25),
        cents(row.p50),
        cents(row.p75),
        cents(row.p95),
    ]
}

fn cents(value: f64) -> String {
    format!("{value:.2}")
}

fn format_money(value: f64) -> String {
    let rounded = format!("{:.2}", value.abs());
    let (whole, frac) = rounded.split_once('.').unwrap_or((rounded.as_str(), "00"));
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if value < 0.0 && rounded != "0.00" { "-" } else { "" };
    format!("{sign}{grouped}.{frac}")
}

fn format_rate(rate: Option<f64>) -> String {
    match rate {
        Some(r) => format!("{:.2}%", r * 100.0),
        None => "n/a".to_string(),
    }
}

fn csv_error(err: csv::Error) -> String {
    format!("CSV export failed: {err}")
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<String, String> {
    let bytes = writer
        .into_inner()
        .map_err(|e| format!("CSV export failed: {e}"))?;
    String::from_utf8(bytes).map_err(|e| format!("CSV export failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PlanInputs, ProjectionRequest, Scenario, project_scenarios};

    fn small_report() -> ProjectionReport {
        let mut request = ProjectionRequest::new(PlanInputs {
            starting_balance: 5_000.0,
            monthly_contribution: 300.0,
            horizon_years: 3,
        });
        request.run_count = 50;
        request.scenarios = vec![
            Scenario::new("Steady", 0.04, 0.0),
            Scenario::new("Growth", 0.09, 0.12),
        ];
        project_scenarios(&request, None).expect("valid request")
    }

    #[test]
    fn money_is_grouped_and_rounded_to_cents() {
        assert_eq!(format_money(1_234_567.891), "1,234,567.89");
        assert_eq!(format_money(999.999), "1,000.00");
        assert_eq!(format_money(12.0), "12.00");
        assert_eq!(format_money(-5.0), "-5.00");
        assert_eq!(format_money(-0.001), "0.00");
    }

    #[test]
    fn undefined_rate_renders_as_not_applicable() {
        assert_eq!(format_rate(None), "n/a");
        assert_eq!(format_rate(Some(0.0712)), "7.12%");
    }

    #[test]
    fn percentile_csv_has_header_and_one_row_per_year() {
        let report = small_report();
        let mc = report.scenarios[1].monte_carlo.as_ref().expect("stochastic");
        let csv = percentiles_csv(&mc.percentiles).expect("csv");
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "year,p5,p25,p50,p75,p95");
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("1,"));
        for value in lines[3].split(',').skip(1) {
            let (_, frac) = value.split_once('.').expect("decimal point");
            assert_eq!(frac.len(), 2);
        }
    }

    #[test]
    fn report_csv_skips_scenarios_without_monte_carlo() {
        let csv = report_csv(&small_report()).expect("csv");
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "scenario,year,p5,p25,p50,p75,p95");
        assert_eq!(lines.len(), 4);
        assert!(lines[1..].iter().all(|l| l.starts_with("Growth,")));
    }

    #[test]
    fn table_lists_every_scenario() {
        let table = render_table(&small_report());
        assert!(table.contains("lognormal model"));
        assert!(table.contains("Steady (mean 4.00%, stdev 0.00%)"));
        assert!(table.contains("Growth (mean 9.00%, stdev 12.00%)"));
        assert!(table.contains("Monte Carlo median"));
        assert_eq!(table.matches("Monte Carlo median").count(), 1);
    }

    #[test]
    fn table_states_contribution_timing() {
        let table = render_table(&small_report());
        assert_eq!(
            table.matches("(contributions at start of month)").count(),
            2
        );
    }
}
