// Report generation from database

use crate::db::Database;
use crate::error::{CoreError, Result};
use crate::model::{
    DiscoveredApi, Scan, StoredForm, StoredPage, Target, TestResult, TestRun, TestStatus,
    TrendPoint,
};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";
const THIN_RULE: &str = "────────────────────────────────────────────────────────────────────────────────";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
}

impl FromStr for ReportFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            other => Err(CoreError::Config(format!("unknown report format '{}'", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReportData {
    pub target: Target,
    pub run: TestRun,
    pub results: Vec<TestResult>,
}

#[derive(Debug, Clone)]
pub struct ScanReportData {
    pub target: Target,
    pub scan: Scan,
    pub pages: Vec<StoredPage>,
    pub apis: Vec<DiscoveredApi>,
    pub forms: Vec<StoredForm>,
}

fn target_of(db: &Database, target_id: i64) -> Result<Target> {
    db.get_target(target_id)?
        .ok_or_else(|| CoreError::NotFound(format!("Target {}", target_id)))
}

pub fn gather_run_report(db: &Database, run_id: i64) -> Result<RunReportData> {
    let run = db
        .get_run(run_id)?
        .ok_or_else(|| CoreError::NotFound(format!("Run {}", run_id)))?;
    Ok(RunReportData {
        target: target_of(db, run.target_id)?,
        results: db.results_for_run(run_id)?,
        run,
    })
}

pub fn gather_scan_report(db: &Database, scan_id: i64) -> Result<ScanReportData> {
    let scan = db
        .get_scan(scan_id)?
        .ok_or_else(|| CoreError::NotFound(format!("Scan {}", scan_id)))?;
    Ok(ScanReportData {
        target: target_of(db, scan.target_id)?,
        pages: db.pages_for_scan(scan_id)?,
        apis: db.apis_for_scan(scan_id)?,
        forms: db.forms_for_scan(scan_id)?,
        scan,
    })
}

fn section(report: &mut String, title: &str) {
    report.push_str(RULE);
    report.push('\n');
    report.push_str(title);
    report.push('\n');
    report.push_str(RULE);
    report.push_str("\n\n");
}

fn header(report: &mut String, title: &str) {
    report.push_str(RULE);
    report.push('\n');
    report.push_str(&format!("{:^80}\n", title));
    report.push_str(RULE);
    report.push_str("\n\n");
}

fn footer(report: &mut String) {
    report.push_str(RULE);
    report.push('\n');
    report.push_str(&format!("{:^80}\n", "End of Report"));
    report.push_str(RULE);
    report.push_str("\n\nGenerated by Surveyor\n");
}

fn status_mark(status: TestStatus) -> &'static str {
    match status {
        TestStatus::Passed => "✓",
        TestStatus::Failed => "✗",
        TestStatus::Skipped => "-",
    }
}

fn http_mark(status: u16) -> &'static str {
    match status {
        200..=299 => "✓",
        300..=399 => "→",
        400..=499 => "⚠",
        500..=599 => "✗",
        _ => "?",
    }
}

pub fn format_duration_ms(ms: u64) -> String {
    if ms >= 1000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}ms", ms)
    }
}

pub fn generate_run_text_report(data: &RunReportData) -> String {
    let mut report = String::new();
    let summary = data.run.summary.clone().unwrap_or_default();

    header(&mut report, "SURVEYOR TEST RUN REPORT");
    report.push_str(&format!("Run ID:       {}\n", data.run.id));
    report.push_str(&format!("Target:       {} ({})\n", data.target.name, data.target.base_url));
    report.push_str(&format!("Scan ID:      {}\n", data.run.scan_id));
    report.push_str(&format!("Status:       {}\n", data.run.status.as_str()));
    report.push_str(&format!("Started:      {}\n", format_timestamp(data.run.started_at)));
    if let Some(finished) = data.run.finished_at {
        report.push_str(&format!("Duration:     {} seconds\n", finished - data.run.started_at));
    }
    let types: Vec<&str> = data.run.test_types.iter().map(|t| t.as_str()).collect();
    report.push_str(&format!("Test types:   {}\n", types.join(", ")));
    if let Some(prompt) = &data.run.ai_prompt {
        report.push_str(&format!("AI prompt:    {}\n", prompt));
    }
    report.push('\n');

    section(&mut report, "SUMMARY");
    if let Some(error) = &summary.error {
        report.push_str("Run failed:\n");
        report.push_str(&wrap_text(error, 80, "  "));
        report.push('\n');
    }
    report.push_str(&format!("Total:     {}\n", summary.total));
    report.push_str(&format!("Passed:    {}\n", summary.passed));
    report.push_str(&format!("Failed:    {}\n", summary.failed));
    report.push_str(&format!("Skipped:   {}\n", summary.skipped));
    report.push_str(&format!("Pass rate: {}%\n\n", summary.pass_rate()));

    let mut by_category: BTreeMap<&str, Vec<&TestResult>> = BTreeMap::new();
    for result in &data.results {
        by_category.entry(&result.category).or_default().push(result);
    }

    if !by_category.is_empty() {
        section(&mut report, "RESULTS BY CATEGORY");
        for (category, results) in &by_category {
            let passed = results.iter().filter(|r| r.status == TestStatus::Passed).count();
            report.push_str(&format!("{} ({}/{} passed)\n", category, passed, results.len()));
            for result in results {
                report.push_str(&format!(
                    "  {} {}  [{}]\n",
                    status_mark(result.status),
                    result.test_name,
                    format_duration_ms(result.duration_ms)
                ));
            }
            report.push('\n');
        }
    }

    let failures: Vec<&TestResult> = data
        .results
        .iter()
        .filter(|r| r.status == TestStatus::Failed)
        .collect();
    if !failures.is_empty() {
        section(&mut report, "FAILURES");
        for (idx, failure) in failures.iter().enumerate() {
            report.push_str(&format!("[{}] {} › {}\n", idx + 1, failure.category, failure.test_name));
            if let Some(message) = &failure.error_message {
                report.push_str(&wrap_text(message, 80, "  "));
            }
            report.push('\n');
            report.push_str(THIN_RULE);
            report.push_str("\n\n");
        }
    }

    footer(&mut report);
    report
}

pub fn generate_run_json_report(data: &RunReportData) -> std::result::Result<String, serde_json::Error> {
    let json_report = serde_json::json!({
        "report": {
            "metadata": {
                "generator": "Surveyor",
                "version": env!("CARGO_PKG_VERSION"),
                "generated_at": chrono::Utc::now().to_rfc3339(),
            },
            "target": {
                "id": data.target.id,
                "name": data.target.name,
                "base_url": data.target.base_url,
            },
            "run": {
                "id": data.run.id,
                "scan_id": data.run.scan_id,
                "status": data.run.status,
                "test_types": data.run.test_types,
                "ai_prompt": data.run.ai_prompt,
                "started_at": format_iso8601_timestamp(data.run.started_at),
                "finished_at": data.run.finished_at.map(format_iso8601_timestamp),
            },
            "summary": data.run.summary,
            "results": data.results,
        }
    });
    serde_json::to_string_pretty(&json_report)
}

pub fn generate_scan_text_report(data: &ScanReportData) -> String {
    let mut report = String::new();
    let stats = data.scan.stats.clone().unwrap_or_default();

    header(&mut report, "SURVEYOR DISCOVERY REPORT");
    report.push_str(&format!("Scan ID:      {}\n", data.scan.id));
    report.push_str(&format!("Target:       {} ({})\n", data.target.name, data.target.base_url));
    report.push_str(&format!("Status:       {}\n", data.scan.status.as_str()));
    report.push_str(&format!("Scan Date:    {}\n", format_timestamp(data.scan.started_at)));
    if let Some(finished) = data.scan.finished_at {
        report.push_str(&format!("Duration:     {} seconds\n", finished - data.scan.started_at));
    }
    if let Some(error) = &stats.error {
        report.push_str(&format!("Error:        {}\n", error));
    }
    report.push_str(&format!(
        "Found:        {} pages ({} auth), {} APIs, {} forms\n\n",
        data.pages.len(),
        data.pages.iter().filter(|p| p.is_auth_page).count(),
        data.apis.len(),
        data.forms.len()
    ));

    section(&mut report, "PAGES");
    if data.pages.is_empty() {
        report.push_str("  (none)\n");
    }
    for page in &data.pages {
        let mut flags = Vec::new();
        if page.is_auth_page {
            flags.push("auth");
        }
        if page.has_forms {
            flags.push("forms");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!("  ({})", flags.join(", "))
        };
        report.push_str(&format!(
            "  {} {} {}  {}{}\n",
            http_mark(page.status_code),
            page.status_code,
            page.url,
            format_duration_ms(page.response_time_ms),
            flags
        ));
        if !page.title.is_empty() {
            report.push_str(&format!("      {}\n", page.title));
        }
    }
    report.push('\n');

    section(&mut report, "API ENDPOINTS");
    if data.apis.is_empty() {
        report.push_str("  (none)\n");
    }
    for api in &data.apis {
        let auth = if api.requires_auth { "  [auth required]" } else { "" };
        report.push_str(&format!(
            "  {} {:<6} {} {}{}\n",
            http_mark(api.status),
            api.method,
            api.status,
            api.url,
            auth
        ));
    }
    report.push('\n');

    section(&mut report, "FORMS");
    if data.forms.is_empty() {
        report.push_str("  (none)\n");
    }
    for form in &data.forms {
        let login = if form.is_login_form { "  [login]" } else { "" };
        report.push_str(&format!("  {} {} on {}{}\n", form.method, form.action, form.page_url, login));
        for field in &form.fields {
            let label = if field.name.is_empty() { &field.id } else { &field.name };
            let required = if field.required { " *" } else { "" };
            report.push_str(&format!("      - {} [{}]{}\n", label, field.field_type, required));
        }
    }
    report.push('\n');

    footer(&mut report);
    report
}

pub fn generate_scan_json_report(data: &ScanReportData) -> std::result::Result<String, serde_json::Error> {
    let json_report = serde_json::json!({
        "report": {
            "metadata": {
                "generator": "Surveyor",
                "version": env!("CARGO_PKG_VERSION"),
                "generated_at": chrono::Utc::now().to_rfc3339(),
            },
            "target": {
                "id": data.target.id,
                "name": data.target.name,
                "base_url": data.target.base_url,
            },
            "scan": {
                "id": data.scan.id,
                "status": data.scan.status,
                "stats": data.scan.stats,
                "started_at": format_iso8601_timestamp(data.scan.started_at),
                "finished_at": data.scan.finished_at.map(format_iso8601_timestamp),
            },
            "pages": data.pages,
            "apis": data.apis,
            "forms": data.forms,
        }
    });
    serde_json::to_string_pretty(&json_report)
}

/// Pass-rate history of a target, with a bar per run.
pub fn generate_trend_text_report(target: &Target, points: &[TrendPoint]) -> String {
    let mut report = String::new();
    section(&mut report, &format!("PASS RATE TREND: {}", target.name));
    if points.is_empty() {
        report.push_str("  No finished runs yet.\n");
        return report;
    }
    for point in points {
        let filled = (point.pass_rate as usize / 5).min(20);
        report.push_str(&format!(
            "  #{:<4} {}  {}{} {:>3}%  ({}/{} passed)\n",
            point.run_id,
            format_timestamp(point.date),
            "█".repeat(filled),
            "░".repeat(20 - filled),
            point.pass_rate,
            point.passed,
            point.total
        ));
        if let Some(prompt) = &point.ai_prompt {
            let preview: String = prompt.chars().take(60).collect();
            report.push_str(&format!("         prompt: {}\n", preview));
        }
    }
    report
}

pub fn save_report(content: &str, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

pub fn format_timestamp(timestamp: i64) -> String {
    use chrono::{DateTime, Utc};
    let datetime = DateTime::<Utc>::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now);
    datetime.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn format_iso8601_timestamp(timestamp: i64) -> String {
    use chrono::{DateTime, Utc};
    let datetime = DateTime::<Utc>::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now);
    datetime.to_rfc3339()
}

fn wrap_text(text: &str, width: usize, indent: &str) -> String {
    let mut result = String::new();
    let mut current_line = String::new();

    for word in text.split_whitespace() {
        if current_line.len() + word.len() + 1 > width - indent.len() && !current_line.is_empty() {
            result.push_str(indent);
            result.push_str(&current_line);
            result.push('\n');
            current_line.clear();
        }
        if !current_line.is_empty() {
            current_line.push(' ');
        }
        current_line.push_str(word);
    }

    if !current_line.is_empty() {
        result.push_str(indent);
        result.push_str(&current_line);
        result.push('\n');
    }
    result
}
