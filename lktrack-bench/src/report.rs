/// Report generation: terminal, JSON output for scenario results.
use crate::metrics::TrackOutcome;

/// Summary of a single scenario run.
#[derive(Debug, serde::Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub category: String,
    pub tracker: String,
    pub passed: bool,
    pub converged: bool,
    pub corner_rmse: f64,
    pub max_corner_error: f64,
    pub translation_error: f64,
    pub similar_fraction: Option<f64>,
    pub track_time_us: u64,
    pub threshold: f64,
    /// Set when the tracker refused the scenario.
    pub error: Option<String>,
}

/// Full report across all scenarios.
#[derive(Debug, serde::Serialize)]
pub struct FullReport {
    pub scenarios: Vec<ScenarioReport>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

impl FullReport {
    pub fn from_scenarios(scenarios: Vec<ScenarioReport>) -> Self {
        let total = scenarios.len();
        let passed = scenarios.iter().filter(|s| s.passed).count();
        let failed = total - passed;
        Self {
            scenarios,
            total,
            passed,
            failed,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Print a terminal table summarizing results.
pub fn print_terminal(report: &FullReport) {
    println!(
        "{:<32} {:>8} {:>8} {:>8} {:>7} {:>6} {:>6}",
        "Scenario", "RMSE", "MaxErr", "Shift", "Verify", "Conv", "Status"
    );
    println!("{}", "-".repeat(82));

    for s in &report.scenarios {
        let status = if s.passed { "PASS" } else { "FAIL" };
        if let Some(err) = &s.error {
            println!("{:<32} {:>47} {:>6}", truncate(&s.name, 32), truncate(err, 47), status);
            continue;
        }
        let verify = s
            .similar_fraction
            .map_or_else(|| "-".to_string(), |f| format!("{:.0}%", f * 100.0));
        println!(
            "{:<32} {:>8.3} {:>8.3} {:>8.3} {:>7} {:>6} {:>6}",
            truncate(&s.name, 32),
            s.corner_rmse,
            s.max_corner_error,
            s.translation_error,
            verify,
            if s.converged { "yes" } else { "no" },
            status,
        );
    }

    println!("{}", "-".repeat(82));
    println!(
        "Total: {} | Passed: {} | Failed: {}",
        report.total, report.passed, report.failed
    );
}

/// Render report as JSON.
pub fn to_json(report: &FullReport) -> String {
    serde_json::to_string_pretty(report).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
}

/// Judge an outcome against a scenario's thresholds.
pub fn scenario_report(
    name: &str,
    category: &str,
    tracker: &str,
    outcome: &TrackOutcome,
    threshold: f64,
    min_similar_fraction: f64,
) -> ScenarioReport {
    let verified = outcome
        .similar_fraction
        .map_or(true, |f| f >= min_similar_fraction);
    let passed = outcome.corner_rmse <= threshold && verified;

    ScenarioReport {
        name: name.to_string(),
        category: category.to_string(),
        tracker: tracker.to_string(),
        passed,
        converged: outcome.converged,
        corner_rmse: outcome.corner_rmse,
        max_corner_error: outcome.max_corner_error,
        translation_error: outcome.translation_error,
        similar_fraction: outcome.similar_fraction,
        track_time_us: outcome.track_time_us,
        threshold,
        error: None,
    }
}

/// A failed report for a scenario the tracker rejected.
pub fn error_report(name: &str, category: &str, tracker: &str, error: &str) -> ScenarioReport {
    ScenarioReport {
        name: name.to_string(),
        category: category.to_string(),
        tracker: tracker.to_string(),
        passed: false,
        converged: false,
        corner_rmse: f64::NAN,
        max_corner_error: f64::NAN,
        translation_error: f64::NAN,
        similar_fraction: None,
        track_time_us: 0,
        threshold: 0.0,
        error: Some(error.to_string()),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 1).collect();
        format!("{head}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(rmse: f64, similar: Option<f64>) -> TrackOutcome {
        TrackOutcome {
            converged: true,
            corners: [[0.0; 2]; 4],
            corner_errors: [rmse; 4],
            corner_rmse: rmse,
            max_corner_error: rmse,
            translation_error: rmse,
            similar_fraction: similar,
            track_time_us: 100,
        }
    }

    #[test]
    fn thresholds_decide_pass() {
        assert!(scenario_report("a", "t", "dense", &outcome(0.1, Some(0.9)), 0.3, 0.8).passed);
        assert!(!scenario_report("b", "t", "dense", &outcome(0.5, Some(0.9)), 0.3, 0.8).passed);
        assert!(!scenario_report("c", "t", "dense", &outcome(0.1, Some(0.5)), 0.3, 0.8).passed);
        // trackers without verification are judged on geometry alone
        assert!(scenario_report("d", "t", "slow", &outcome(0.1, None), 0.3, 0.8).passed);
    }

    #[test]
    fn full_report_counts() {
        let reports = vec![
            scenario_report("a", "t", "dense", &outcome(0.1, None), 0.3, 0.8),
            error_report("b", "t", "dense", "invalid size"),
        ];
        let full = FullReport::from_scenarios(reports);
        assert_eq!(full.total, 2);
        assert_eq!(full.passed, 1);
        assert_eq!(full.failed, 1);
        assert!(!full.all_passed());
    }

    #[test]
    fn json_output_parses() {
        let full = FullReport::from_scenarios(vec![]);
        let json = to_json(&full);
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["total"], 0);
        assert_eq!(parsed["passed"], 0);
    }

    #[test]
    fn truncate_long_string() {
        let result = truncate("this-is-a-very-long-scenario-name", 20);
        assert_eq!(result.chars().count(), 20);
        assert!(result.ends_with('…'));
        assert_eq!(truncate("short", 10), "short");
    }
}
