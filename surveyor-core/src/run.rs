use crate::ai::ContextPage;
use crate::auth::auth_headers;
use crate::collector::collect_results;
use crate::db::Database;
use crate::error::{CoreError, Result};
use crate::events::{Channel, EventSink};
use crate::generator::{GenerationRequest, TestGenerator};
use crate::model::{RunSummary, TestStatus, TestType, Target};
use crate::runner::{RunnerEvent, TestRunner};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use surveyor_scanner::{BrowserLauncher, LaunchOptions, Scout};
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub scan_id: i64,
    pub test_types: Vec<TestType>,
    pub ai_prompt: Option<String>,
    pub ai_only: bool,
    /// Re-explore the target before asking the model for tests.
    pub scout: bool,
}

impl RunRequest {
    pub fn prompt(&self) -> Option<&str> {
        self.ai_prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CategoryProgress {
    pub done: usize,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

/// Generation, execution and collection for one test run.
pub struct RunCoordinator {
    generator: TestGenerator,
    runner: TestRunner,
    results_dir: PathBuf,
    scout: Option<(Arc<dyn BrowserLauncher>, LaunchOptions)>,
}

impl RunCoordinator {
    pub fn new(generator: TestGenerator, runner: TestRunner, results_dir: impl Into<PathBuf>) -> Self {
        Self {
            generator,
            runner,
            results_dir: results_dir.into(),
            scout: None,
        }
    }

    pub fn with_scout(mut self, launcher: Arc<dyn BrowserLauncher>, options: LaunchOptions) -> Self {
        self.scout = Some((launcher, options));
        self
    }

    /// Check the request against `target` and record a running test run.
    pub fn start(&self, db: &Database, target: &Target, request: &RunRequest) -> Result<i64> {
        let scan = db
            .get_scan(request.scan_id)?
            .ok_or_else(|| CoreError::NotFound(format!("Scan {}", request.scan_id)))?;
        if scan.target_id != target.id {
            return Err(CoreError::Config(format!(
                "scan {} does not belong to target {}",
                scan.id, target.name
            )));
        }
        if !scan.status.is_terminal() {
            return Err(CoreError::Config(format!("scan {} is still running", scan.id)));
        }
        if request.ai_only && request.prompt().is_none() {
            return Err(CoreError::Config("AI-only runs need a prompt".into()));
        }
        if request.test_types.is_empty() && request.prompt().is_none() {
            return Err(CoreError::Config("no test types selected and no prompt given".into()));
        }
        db.create_run(target.id, scan.id, &request.test_types, request.prompt())
    }

    /// Execute run `run_id`. The run row always ends in a terminal state;
    /// on failure the error is also returned.
    pub async fn execute(
        &self,
        db: &Database,
        events: &dyn EventSink,
        run_id: i64,
        target: &Target,
        request: &RunRequest,
    ) -> Result<RunSummary> {
        match self.pipeline(db, events, run_id, target, request).await {
            Ok(summary) => {
                info!(
                    "Run {} done: {}/{} passed",
                    run_id, summary.passed, summary.total
                );
                events.emit(Channel::Run, run_id, "done", json!({ "summary": summary }));
                Ok(summary)
            }
            Err(e) => {
                let message = e.to_string();
                warn!("Run {} failed: {}", run_id, message);
                if let Err(db_err) = db.fail_run(run_id, &message) {
                    warn!("Could not record failure of run {}: {}", run_id, db_err);
                }
                events.emit(Channel::Run, run_id, "error", json!({ "message": message }));
                Err(e)
            }
        }
    }

    async fn scouted_pages(&self, target: &Target, request: &RunRequest) -> Vec<ContextPage> {
        let Some((launcher, options)) = &self.scout else {
            return Vec::new();
        };
        if !request.scout || request.prompt().is_none() {
            return Vec::new();
        }
        Scout::new()
            .scout_target(launcher.as_ref(), options, &target.base_url)
            .await
            .into_iter()
            .map(ContextPage::from)
            .collect()
    }

    async fn pipeline(
        &self,
        db: &Database,
        events: &dyn EventSink,
        run_id: i64,
        target: &Target,
        request: &RunRequest,
    ) -> Result<RunSummary> {
        let generation = GenerationRequest {
            base_url: target.base_url.clone(),
            test_types: request.test_types.clone(),
            pages: db.pages_for_scan(request.scan_id)?,
            apis: db.apis_for_scan(request.scan_id)?,
            forms: db.forms_for_scan(request.scan_id)?,
            auth_headers: auth_headers(target.auth_type, &target.auth_config),
            ai_prompt: request.prompt().map(str::to_string),
            ai_only: request.ai_only,
            scouted: self.scouted_pages(target, request).await,
        };

        events.emit(Channel::Run, run_id, "status", json!({ "phase": "generating" }));
        let files = self.generator.generate(&generation).await?;

        if files.is_empty() {
            info!("Run {}: nothing to test", run_id);
            let summary = RunSummary::default();
            db.finish_run(run_id, &summary)?;
            return Ok(summary);
        }

        let categories: BTreeMap<&str, usize> = files
            .iter()
            .map(|f| (f.category.as_str(), f.tests))
            .collect();
        let expected: usize = categories.values().sum();
        events.emit(
            Channel::Run,
            run_id,
            "generation_done",
            json!({ "categories": &categories, "total": expected }),
        );

        events.emit(Channel::Run, run_id, "status", json!({ "phase": "executing" }));
        let mut progress: BTreeMap<String, CategoryProgress> = categories
            .iter()
            .map(|(category, tests)| {
                (
                    category.to_string(),
                    CategoryProgress {
                        total: *tests,
                        ..Default::default()
                    },
                )
            })
            .collect();
        let mut total = expected;
        let mut completed = 0;

        let report = self
            .runner
            .execute(
                run_id,
                self.generator.out_dir(),
                &self.results_dir,
                |event| match event {
                    RunnerEvent::Total { total: announced, workers } => {
                        total = announced;
                        events.emit(
                            Channel::Run,
                            run_id,
                            "test_total",
                            json!({ "total": announced, "workers": workers }),
                        );
                    }
                    RunnerEvent::Result {
                        name,
                        category,
                        status,
                        duration_ms,
                    } => {
                        completed += 1;
                        let entry = progress.entry(category.clone()).or_default();
                        entry.done += 1;
                        match status {
                            TestStatus::Passed => entry.passed += 1,
                            TestStatus::Failed => entry.failed += 1,
                            TestStatus::Skipped => {}
                        }
                        events.emit(
                            Channel::Run,
                            run_id,
                            "test_result",
                            json!({
                                "name": name,
                                "category": category,
                                "status": status,
                                "duration": duration_ms,
                                "completed": completed,
                                "total": total.max(completed),
                                "category_progress": &progress,
                            }),
                        );
                    }
                },
            )
            .await?;

        events.emit(Channel::Run, run_id, "status", json!({ "phase": "collecting" }));
        collect_results(db, run_id, &report)
    }
}
