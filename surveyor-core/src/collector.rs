use crate::db::Database;
use crate::error::{CoreError, ExecutionError, Result};
use crate::model::{RunSummary, TestResult, TestStatus};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

const MAX_ERROR_CHARS: usize = 500;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Report {
    pub suites: Vec<Suite>,
    pub stats: Option<ReportStats>,
    #[serde(rename = "_fallback")]
    pub fallback: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Suite {
    pub title: String,
    pub specs: Vec<Spec>,
    pub suites: Vec<Suite>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Spec {
    pub title: String,
    pub tests: Vec<SpecTest>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SpecTest {
    pub results: Vec<SpecResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SpecResult {
    pub status: String,
    pub duration: f64,
    pub error: Option<ReportError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ReportError {
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ReportStats {
    pub expected: usize,
    pub unexpected: usize,
    pub skipped: usize,
}

/// Describe-block title to result category.
pub fn map_category(title: &str) -> String {
    let lower = title.to_lowercase();
    let known = [
        ("page", "pages"),
        ("api", "apis"),
        ("security", "security"),
        ("form", "forms"),
        ("load", "load"),
        ("custom", "custom"),
    ];
    known
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, category)| category.to_string())
        .unwrap_or_else(|| title.to_string())
}

fn truncate_error(message: &str) -> String {
    if message.chars().count() > MAX_ERROR_CHARS {
        let head: String = message.chars().take(MAX_ERROR_CHARS).collect();
        format!("{}...", head)
    } else {
        message.to_string()
    }
}

fn walk(suites: &[Suite], parent: &str, out: &mut Vec<TestResult>) {
    for suite in suites {
        let title = if suite.title.is_empty() { parent } else { &suite.title };
        let category = map_category(if title.is_empty() { "general" } else { title });

        for spec in &suite.specs {
            // Without a recorded attempt the test never ran.
            let result = spec.tests.first().and_then(|t| t.results.first());
            let (status, duration_ms, error_message) = match result {
                Some(r) => (
                    TestStatus::from_runner(&r.status),
                    r.duration.max(0.0).round() as u64,
                    r.error
                        .as_ref()
                        .and_then(|e| e.message.as_deref())
                        .map(truncate_error),
                ),
                None => (TestStatus::Skipped, 0, None),
            };
            out.push(TestResult {
                category: category.clone(),
                test_name: spec.title.clone(),
                status,
                duration_ms,
                error_message,
            });
        }

        walk(&suite.suites, title, out);
    }
}

fn fallback_results(stats: &ReportStats) -> Vec<TestResult> {
    let row = |name: String, status| TestResult {
        category: "general".into(),
        test_name: name,
        status,
        duration_ms: 0,
        error_message: None,
    };
    let mut results = Vec::new();
    results.extend((1..=stats.expected).map(|i| row(format!("Test {}", i), TestStatus::Passed)));
    results.extend(
        (1..=stats.unexpected).map(|i| row(format!("Failed Test {}", i), TestStatus::Failed)),
    );
    results.extend(
        (1..=stats.skipped).map(|i| row(format!("Skipped Test {}", i), TestStatus::Skipped)),
    );
    results
}

/// Flatten a report into result rows.
pub fn results_from_report(report: &Report) -> Vec<TestResult> {
    if report.fallback {
        return report
            .stats
            .as_ref()
            .map(fallback_results)
            .unwrap_or_default();
    }
    let mut results = Vec::new();
    walk(&report.suites, "", &mut results);
    results
}

pub fn read_report(path: &Path) -> std::result::Result<Report, String> {
    let raw = fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&raw).map_err(|e| e.to_string())
}

/// Store the results of a finished run and close it. An unreadable report
/// closes the run as failed instead.
pub fn collect_results(db: &Database, run_id: i64, report_path: &Path) -> Result<RunSummary> {
    let report = match read_report(report_path) {
        Ok(report) => report,
        Err(e) => {
            let message = format!("Failed to parse test results: {}", e);
            warn!("Run {}: {}", run_id, message);
            db.fail_run(run_id, &message)?;
            return Err(CoreError::Execution(ExecutionError::UnreadableReport(e)));
        }
    };

    let results = results_from_report(&report);
    for result in &results {
        db.insert_test_result(run_id, result)?;
    }
    let summary = db.summarize_run(run_id)?;
    db.finish_run(run_id, &summary)?;
    info!(
        "Run {} collected: {} passed, {} failed, {} skipped",
        run_id, summary.passed, summary.failed, summary.skipped
    );
    Ok(summary)
}
