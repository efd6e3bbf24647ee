//! Drives the external Playwright process: streams its list output as
//! per-test events and leaves a JSON report behind for the collector.

use crate::error::ExecutionError;
use crate::generator::CONFIG_FILE;
use crate::model::TestStatus;
use regex::Regex;
use serde_json::{Value, json};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

pub const KNOWN_CATEGORIES: [&str; 5] = ["pages", "apis", "security", "forms", "load"];

static ANSI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1B\[[0-9;?]*[A-Za-z]").expect("valid regex"));

static TOTALS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Running (\d+) tests? using (\d+) workers?").expect("valid regex")
});

// "  ✓  3 [chromium] › pages.spec.js:12:5 › Page Tests › Page loads: / (1.2s)"
static RESULT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?P<mark>[✓✔✘✗×-])\s+(?:\d+\s+)?(?:\[[^\]]+\]\s+›\s+)?(?P<file>[^\s›]+?\.(?:spec|test)\.[cm]?[jt]s)(?::\d+(?::\d+)?)?\s+›\s+(?P<title>.+?)(?:\s+\((?P<dur>\d+(?:\.\d+)?)(?P<unit>ms|s|m)\))?\s*$",
    )
    .expect("valid regex")
});

static PASSED_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) passed").expect("valid regex"));
static FAILED_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) failed").expect("valid regex"));
static SKIPPED_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) skipped").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerEvent {
    Total {
        total: usize,
        workers: usize,
    },
    Result {
        name: String,
        category: String,
        status: TestStatus,
        duration_ms: u64,
    },
}

pub fn strip_ansi(line: &str) -> String {
    ANSI.replace_all(line, "").into_owned()
}

/// Category from the spec file name, then from the suite title, then the
/// bare file stem.
pub fn extract_category(file: &str, title_parts: &[&str]) -> String {
    let file_name = file.rsplit(['/', '\\']).next().unwrap_or(file);
    let stem = file_name
        .split_once(".spec.")
        .or_else(|| file_name.split_once(".test."))
        .map(|(stem, _)| stem)
        .unwrap_or(file_name);

    if KNOWN_CATEGORIES.contains(&stem) {
        return stem.to_string();
    }
    if title_parts.len() > 1 {
        let suite = title_parts[0].to_lowercase();
        if let Some(category) = KNOWN_CATEGORIES.iter().find(|c| suite.contains(*c)) {
            return category.to_string();
        }
    }
    if stem.is_empty() {
        "other".to_string()
    } else {
        stem.to_string()
    }
}

fn duration_ms(value: &str, unit: &str) -> u64 {
    let value: f64 = value.parse().unwrap_or(0.0);
    let ms = match unit {
        "s" => value * 1000.0,
        "m" => value * 60_000.0,
        _ => value,
    };
    ms.round() as u64
}

/// One line of list-reporter output, if it says something we track.
pub fn parse_line(raw: &str) -> Option<RunnerEvent> {
    let line = strip_ansi(raw);

    if let Some(caps) = TOTALS.captures(&line) {
        return Some(RunnerEvent::Total {
            total: caps[1].parse().ok()?,
            workers: caps[2].parse().ok()?,
        });
    }

    let caps = RESULT_LINE.captures(&line)?;
    let status = match &caps["mark"] {
        "-" => TestStatus::Skipped,
        "✓" | "✔" => TestStatus::Passed,
        _ => TestStatus::Failed,
    };
    let title = caps["title"].trim();
    let parts: Vec<&str> = title.split(" › ").map(str::trim).collect();
    let name = parts
        .last()
        .filter(|p| !p.is_empty())
        .copied()
        .unwrap_or(title);
    let duration_ms = match (caps.name("dur"), caps.name("unit")) {
        (Some(d), Some(u)) => duration_ms(d.as_str(), u.as_str()),
        _ => 0,
    };

    Some(RunnerEvent::Result {
        name: name.to_string(),
        category: extract_category(&caps["file"], &parts),
        status,
        duration_ms,
    })
}

/// Report stand-in built from the run's closing totals, for when the JSON
/// reporter left nothing behind.
pub fn parse_fallback(output: &str) -> Value {
    let output = strip_ansi(output);
    let count = |re: &Regex| -> u64 {
        re.captures(&output)
            .and_then(|c| c[1].parse().ok())
            .unwrap_or(0)
    };
    json!({
        "suites": [],
        "stats": {
            "expected": count(&PASSED_COUNT),
            "unexpected": count(&FAILED_COUNT),
            "skipped": count(&SKIPPED_COUNT),
        },
        "_fallback": true,
    })
}

fn spec_files(dir: &Path) -> std::io::Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let mut count = 0;
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        if name.to_string_lossy().ends_with(".spec.js") {
            count += 1;
        }
    }
    Ok(count)
}

pub struct TestRunner {
    command: Vec<String>,
    workdir: Option<PathBuf>,
    workers: usize,
    timeout: Duration,
}

impl TestRunner {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            workdir: None,
            workers: 2,
            timeout: Duration::from_secs(300),
        }
    }

    /// Directory the runner starts in; defaults to the test directory.
    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run every spec in `test_dir`. Per-test lines are handed to `on_event`
    /// as they arrive. Failing tests are not an error here; the returned
    /// report says how the run went.
    pub async fn execute(
        &self,
        run_id: i64,
        test_dir: &Path,
        results_dir: &Path,
        mut on_event: impl FnMut(RunnerEvent),
    ) -> Result<PathBuf, ExecutionError> {
        if spec_files(test_dir)? == 0 {
            return Err(ExecutionError::NoTestFiles);
        }
        fs::create_dir_all(results_dir)?;
        let report_path = results_dir.join(format!("run-{}.json", run_id));
        if report_path.exists() {
            fs::remove_file(&report_path)?;
        }

        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| ExecutionError::RunnerNotFound("empty runner command".into()))?;
        let workdir = self.workdir.as_deref().unwrap_or(test_dir);

        let mut command = Command::new(program);
        command
            .args(args)
            .arg(format!("--config={}", test_dir.join(CONFIG_FILE).display()))
            .arg(format!("--workers={}", self.workers))
            .arg("--reporter=list,json")
            .current_dir(workdir)
            .env("PLAYWRIGHT_JSON_OUTPUT_NAME", &report_path)
            .env("FORCE_COLOR", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!("Starting test runner: {} (run {})", self.command.join(" "), run_id);
        let mut child = command.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => ExecutionError::RunnerNotFound(program.clone()),
            _ => ExecutionError::Spawn(e.to_string()),
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecutionError::Spawn("runner stdout unavailable".into()))?;
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let mut transcript = String::new();
        let streamed = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                debug!("runner: {}", line);
                if let Some(event) = parse_line(&line) {
                    on_event(event);
                }
                transcript.push_str(&line);
                transcript.push('\n');
            }
            child.wait().await
        };

        let outcome = tokio::time::timeout(self.timeout, streamed).await;
        match outcome {
            Ok(status) => {
                let status = status?;
                info!("Test runner exited with {}", status);
            }
            Err(_) => {
                warn!("Test runner exceeded {}s, killing it", self.timeout.as_secs());
                let _ = child.kill().await;
                return Err(ExecutionError::Timeout(self.timeout.as_secs()));
            }
        }

        if let Some(task) = stderr_task {
            let stderr = task.await.unwrap_or_default();
            if !stderr.trim().is_empty() {
                debug!("runner stderr: {}", stderr.trim());
                transcript.push_str(&stderr);
            }
        }

        if !report_path.exists() {
            warn!("No JSON report at {}, using output totals", report_path.display());
            fs::write(&report_path, parse_fallback(&transcript).to_string())?;
        }
        Ok(report_path)
    }
}
