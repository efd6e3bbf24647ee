//! Records owned by the database: targets, scans and what they found, test
//! runs and their results.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use surveyor_scanner::{FormField, UiSnapshot};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStrategy {
    #[default]
    None,
    Form,
    Basic,
    Bearer,
    Cookie,
}

impl AuthStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthStrategy::None => "none",
            AuthStrategy::Form => "form",
            AuthStrategy::Basic => "basic",
            AuthStrategy::Bearer => "bearer",
            AuthStrategy::Cookie => "cookie",
        }
    }
}

impl FromStr for AuthStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(AuthStrategy::None),
            "form" => Ok(AuthStrategy::Form),
            "basic" => Ok(AuthStrategy::Basic),
            "bearer" => Ok(AuthStrategy::Bearer),
            "cookie" => Ok(AuthStrategy::Cookie),
            other => Err(CoreError::Config(format!("unknown auth strategy '{}'", other))),
        }
    }
}

impl fmt::Display for AuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy-specific settings. Which keys matter depends on the
/// [`AuthStrategy`]; the rest are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username_selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submit_selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_api: Option<String>,
    /// Dotted path of the token inside the login response, `token` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    pub name: String,
    pub base_url: String,
    pub auth_type: AuthStrategy,
    pub auth_config: AuthConfig,
    pub settings: serde_json::Value,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Running,
    Done,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Running => "running",
            Status::Done => "done",
            Status::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Running)
    }
}

impl FromStr for Status {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Status::Running),
            "done" => Ok(Status::Done),
            "error" => Ok(Status::Error),
            other => Err(CoreError::Config(format!("unknown status '{}'", other))),
        }
    }
}

/// Counts written when a scan finishes, or the error that ended it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanStats {
    pub pages: usize,
    pub apis: usize,
    pub forms: usize,
    pub auth_pages: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScanStats {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    pub id: i64,
    pub target_id: i64,
    pub status: Status,
    /// Only meaningful once `status` is terminal.
    pub stats: Option<ScanStats>,
    pub started_at: i64,
    pub finished_at: Option<i64>,
}

/// A page row as stored for a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPage {
    pub url: String,
    pub title: String,
    pub status_code: u16,
    pub response_time_ms: u64,
    pub has_forms: bool,
    pub is_auth_page: bool,
    pub ui_elements: UiSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredApi {
    pub method: String,
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub requires_auth: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredForm {
    pub page_url: String,
    pub action: String,
    pub method: String,
    pub fields: Vec<FormField>,
    pub is_login_form: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    Pages,
    Apis,
    Forms,
    Security,
    Load,
}

impl TestType {
    pub const ALL: [TestType; 5] = [
        TestType::Pages,
        TestType::Apis,
        TestType::Forms,
        TestType::Security,
        TestType::Load,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::Pages => "pages",
            TestType::Apis => "apis",
            TestType::Forms => "forms",
            TestType::Security => "security",
            TestType::Load => "load",
        }
    }
}

impl FromStr for TestType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TestType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CoreError::Config(format!("unknown test type '{}'", s)))
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Skipped => "skipped",
        }
    }

    /// Runner statuses outside passed/skipped (timedOut, interrupted, ...)
    /// count as failures.
    pub fn from_runner(status: &str) -> Self {
        match status {
            "passed" => TestStatus::Passed,
            "skipped" => TestStatus::Skipped,
            _ => TestStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub category: String,
    pub test_name: String,
    pub status: TestStatus,
    pub duration_ms: u64,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunSummary {
    pub fn from_results(results: &[TestResult]) -> Self {
        let count = |status| results.iter().filter(|r| r.status == status).count();
        Self {
            total: results.len(),
            passed: count(TestStatus::Passed),
            failed: count(TestStatus::Failed),
            skipped: count(TestStatus::Skipped),
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Whole-number percentage, 0 for an empty run.
    pub fn pass_rate(&self) -> u32 {
        if self.total == 0 {
            0
        } else {
            ((self.passed as f64 / self.total as f64) * 100.0).round() as u32
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRun {
    pub id: i64,
    pub target_id: i64,
    pub scan_id: i64,
    pub test_types: Vec<TestType>,
    pub ai_prompt: Option<String>,
    pub status: Status,
    pub summary: Option<RunSummary>,
    pub started_at: i64,
    pub finished_at: Option<i64>,
}

/// One finished run as seen on a target's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub run_id: i64,
    pub date: i64,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pass_rate: u32,
    pub ai_prompt: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: TestStatus) -> TestResult {
        TestResult {
            category: "pages".into(),
            test_name: "t".into(),
            status,
            duration_ms: 1,
            error_message: None,
        }
    }

    #[test]
    fn test_summary_partitions_results() {
        let summary = RunSummary::from_results(&[
            result(TestStatus::Passed),
            result(TestStatus::Failed),
            result(TestStatus::Passed),
            result(TestStatus::Skipped),
        ]);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.passed + summary.failed + summary.skipped, summary.total);
        assert_eq!(summary.pass_rate(), 50);
        assert_eq!(RunSummary::default().pass_rate(), 0);
    }

    #[test]
    fn test_runner_status_mapping() {
        assert_eq!(TestStatus::from_runner("passed"), TestStatus::Passed);
        assert_eq!(TestStatus::from_runner("skipped"), TestStatus::Skipped);
        assert_eq!(TestStatus::from_runner("timedOut"), TestStatus::Failed);
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("Bearer".parse::<AuthStrategy>().unwrap(), AuthStrategy::Bearer);
        assert!("oauth".parse::<AuthStrategy>().is_err());
        assert_eq!(" apis".parse::<TestType>().unwrap(), TestType::Apis);
        assert!("smoke".parse::<TestType>().is_err());
    }

    #[test]
    fn test_stats_wire_shape() {
        let json = serde_json::to_value(ScanStats::failed("boom")).unwrap();
        assert_eq!(json["error"], "boom");
        let json = serde_json::to_value(ScanStats {
            pages: 2,
            ..Default::default()
        })
        .unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["auth_pages"], 0);
    }
}
