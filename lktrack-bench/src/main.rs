use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rayon::prelude::*;

use lktrack_bench::catalog::{self, Category, Scenario};
use lktrack_bench::report::{self, FullReport, ScenarioReport};
use lktrack_bench::runner::{self, TrackerKind};

#[derive(Parser)]
#[command(name = "lktrack-bench", about = "Lucas-Kanade tracking test harness")]
struct Cli {
    /// Suppress log output on stderr.
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run test scenarios and output results.
    Run {
        /// Filter by category name.
        #[arg(long)]
        category: Option<String>,
        /// Filter by scenario name pattern (substring match).
        #[arg(long)]
        scenario: Option<String>,
        /// Only run scenarios using this tracker: dense, sampled, slow.
        #[arg(long)]
        tracker: Option<String>,
        /// Output format: terminal, json.
        #[arg(long, default_value = "terminal")]
        format: String,
        /// Corner RMSE pass threshold in pixels; 0 keeps each scenario's own.
        #[arg(long, default_value_t = 0.0)]
        threshold: f64,
        /// Only show failures.
        #[arg(long)]
        failures_only: bool,
    },
    /// List available scenarios.
    List {
        /// Filter by category.
        #[arg(long)]
        category: Option<String>,
    },
    /// Run all scenarios and exit with code 1 on any failure.
    Regression {
        /// Filter by category.
        #[arg(long)]
        category: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.quiet { "error" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Command::Run {
            category,
            scenario,
            tracker,
            format,
            threshold,
            failures_only,
        } => cmd_run(category, scenario, tracker, &format, threshold, failures_only),
        Command::List { category } => cmd_list(category),
        Command::Regression { category } => cmd_regression(category),
    }
}

fn filter_scenarios(
    category: Option<String>,
    scenario: Option<String>,
    tracker: Option<String>,
) -> Result<Vec<Scenario>> {
    let mut scenarios = match &category {
        Some(name) => {
            let cat = Category::from_name(name).with_context(|| format!("unknown category: {name}"))?;
            catalog::scenarios_for_category(cat)
        }
        None => catalog::all_scenarios(),
    };

    if let Some(pattern) = &scenario {
        scenarios.retain(|s| s.name.contains(pattern.as_str()));
    }
    if let Some(name) = &tracker {
        let kind = TrackerKind::from_name(name).with_context(|| format!("unknown tracker: {name}"))?;
        scenarios.retain(|s| s.setup.kind == kind);
    }
    if scenarios.is_empty() {
        bail!("no scenarios match the given filters");
    }
    Ok(scenarios)
}

fn run_scenario(scenario: &Scenario, threshold_override: f64) -> ScenarioReport {
    let scene = scenario.build();
    let category = scenario.category.name();
    let tracker = scenario.setup.kind.name();
    match runner::track(&scene, &scenario.setup) {
        Ok(outcome) => {
            let threshold = if threshold_override > 0.0 {
                threshold_override
            } else {
                scenario.max_corner_rmse
            };
            report::scenario_report(
                &scenario.name,
                category,
                tracker,
                &outcome,
                threshold,
                scenario.min_similar_fraction,
            )
        }
        Err(e) => {
            log::error!("{}: {e}", scenario.name);
            report::error_report(&scenario.name, category, tracker, &e.to_string())
        }
    }
}

/// Scenarios own their trackers, so they run concurrently.
fn run_all(scenarios: &[Scenario], threshold_override: f64) -> Vec<ScenarioReport> {
    scenarios
        .par_iter()
        .map(|s| run_scenario(s, threshold_override))
        .collect()
}

fn cmd_run(
    category: Option<String>,
    scenario: Option<String>,
    tracker: Option<String>,
    format: &str,
    threshold_override: f64,
    failures_only: bool,
) -> Result<()> {
    let scenarios = filter_scenarios(category, scenario, tracker)?;
    let mut reports = run_all(&scenarios, threshold_override);
    if failures_only {
        reports.retain(|r| !r.passed);
    }

    let full = FullReport::from_scenarios(reports);
    match format {
        "json" => println!("{}", report::to_json(&full)),
        "terminal" => report::print_terminal(&full),
        other => bail!("unknown format: {other}"),
    }
    Ok(())
}

fn cmd_list(category: Option<String>) -> Result<()> {
    let scenarios = filter_scenarios(category, None, None)?;
    println!("{:<32} {:<14} {:<8} Description", "Name", "Category", "Tracker");
    println!("{}", "-".repeat(90));
    for s in &scenarios {
        println!(
            "{:<32} {:<14} {:<8} {}",
            s.name,
            s.category.name(),
            s.setup.kind.name(),
            s.description
        );
    }
    println!("\nTotal: {} scenarios", scenarios.len());
    Ok(())
}

fn cmd_regression(category: Option<String>) -> Result<()> {
    let scenarios = filter_scenarios(category, None, None)?;
    let full = FullReport::from_scenarios(run_all(&scenarios, 0.0));
    report::print_terminal(&full);

    if !full.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}
