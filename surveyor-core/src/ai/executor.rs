//! Runs a test plan directly against a [`BrowserPage`], following the same
//! rules as the generated Playwright code. Useful for checking a plan
//! before it is written out.

use super::codegen::join_url;
use super::plan::{Step, TestPlan};
use super::strategy::{FillStrategy, fill_strategies, select_locators};
use regex::RegexBuilder;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use surveyor_scanner::browser::ApiRequest;
use surveyor_scanner::{BrowserPage, Locator, Role};
use tracing::{debug, warn};

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
const IDLE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub action: &'static str,
    pub ok: bool,
    pub detail: Option<String>,
    /// Set for `fill` steps that found their field.
    pub strategy: Option<FillStrategy>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseOutcome {
    pub name: String,
    pub passed: bool,
    pub steps: Vec<StepOutcome>,
    pub failure: Option<String>,
}

type StepResult = std::result::Result<Option<FillStrategy>, String>;

pub struct PlanExecutor<'a> {
    page: &'a dyn BrowserPage,
    base_url: String,
    auth_headers: BTreeMap<String, String>,
    settle: Duration,
}

impl<'a> PlanExecutor<'a> {
    pub fn new(page: &'a dyn BrowserPage, base_url: &str) -> Self {
        Self {
            page,
            base_url: base_url.to_string(),
            auth_headers: BTreeMap::new(),
            settle: Duration::from_millis(1500),
        }
    }

    pub fn with_auth_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.auth_headers = headers;
        self
    }

    /// Pause after navigations and clicks.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub async fn run_plans(&self, plans: &[TestPlan]) -> Vec<CaseOutcome> {
        let mut outcomes = Vec::with_capacity(plans.len());
        for plan in plans {
            outcomes.push(self.run_case(plan).await);
        }
        outcomes
    }

    /// Failing interaction steps are recorded and skipped; the first failing
    /// assertion fails the case and ends it.
    pub async fn run_case(&self, plan: &TestPlan) -> CaseOutcome {
        let mut previous_url = String::new();
        let mut steps = Vec::new();

        for step in &plan.steps {
            let result = self.run_step(step, &mut previous_url).await;
            let action = step.action_name();
            match result {
                Ok(strategy) => steps.push(StepOutcome {
                    action,
                    ok: true,
                    detail: None,
                    strategy,
                }),
                Err(message) => {
                    steps.push(StepOutcome {
                        action,
                        ok: false,
                        detail: Some(message.clone()),
                        strategy: None,
                    });
                    if step.is_assertion() {
                        debug!("'{}' failed at {}: {}", plan.name, action, message);
                        return CaseOutcome {
                            name: plan.name.clone(),
                            passed: false,
                            steps,
                            failure: Some(format!("{}: {}", action, message)),
                        };
                    }
                    warn!("[Step failed] {}: {}", action, message);
                }
            }
        }

        CaseOutcome {
            name: plan.name.clone(),
            passed: true,
            steps,
            failure: None,
        }
    }

    async fn current_url(&self) -> std::result::Result<String, String> {
        self.page.current_url().await.map_err(|e| e.to_string())
    }

    async fn run_step(&self, step: &Step, previous_url: &mut String) -> StepResult {
        match step {
            Step::Goto { path } => {
                self.page
                    .goto(&join_url(&self.base_url, path), NAVIGATION_TIMEOUT)
                    .await
                    .map_err(|e| e.to_string())?;
                self.page.wait(self.settle).await;
                *previous_url = self.current_url().await?;
                Ok(None)
            }
            Step::ClickLink { text } => {
                self.click(Locator::role(Role::Link, text), previous_url).await
            }
            Step::ClickButton { text } => {
                self.click(Locator::role(Role::Button, text), previous_url).await
            }
            Step::Fill { field, value } => self.fill(field, value).await.map(Some),
            Step::Select { field, value } => {
                for locator in select_locators(field) {
                    if self.page.is_visible(&locator).await.unwrap_or(false) {
                        return self
                            .page
                            .select_option(&locator, value)
                            .await
                            .map(|_| None)
                            .map_err(|e| e.to_string());
                    }
                }
                Err(format!("Could not find select: {}", field))
            }
            Step::Wait { seconds } => {
                self.page
                    .wait(Duration::from_secs_f64(seconds.clamp(0.0, 600.0)))
                    .await;
                Ok(None)
            }
            Step::AssertUrlContains { text } => {
                let url = self.current_url().await?;
                if url.to_lowercase().contains(&text.to_lowercase()) {
                    Ok(None)
                } else {
                    Err(format!("expected URL {} to contain '{}'", url, text))
                }
            }
            Step::AssertUrlChanged => {
                let url = self.current_url().await?;
                if url != *previous_url {
                    Ok(None)
                } else {
                    Err(format!("URL stayed at {}", url))
                }
            }
            Step::AssertUrlNotChanged => {
                let url = self.current_url().await?;
                if url == *previous_url {
                    Ok(None)
                } else {
                    Err(format!("URL changed from {} to {}", previous_url, url))
                }
            }
            Step::AssertVisible { text } => {
                self.expect_visible(&Locator::Text(text.clone()), true).await
            }
            Step::AssertNotVisible { text } => {
                self.expect_visible(&Locator::Text(text.clone()), false).await
            }
            Step::AssertElementExists { selector } => {
                self.expect_visible(&Locator::Css(selector.clone()), true).await
            }
            Step::AssertElementCount { selector, min } => {
                let count = self
                    .page
                    .count(&Locator::Css(selector.clone()))
                    .await
                    .map_err(|e| e.to_string())?;
                if count >= *min {
                    Ok(None)
                } else {
                    Err(format!("found {} of '{}', expected at least {}", count, selector, min))
                }
            }
            Step::AssertPageHasText { pattern } => {
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| format!("invalid pattern '{}': {}", pattern, e))?;
                let body = self.page.body_text().await.map_err(|e| e.to_string())?;
                if regex.is_match(&body) {
                    Ok(None)
                } else {
                    Err(format!("page text does not match /{}/i", pattern))
                }
            }
            Step::ApiGet { path, assert_status } => {
                let request = ApiRequest::get(join_url(&self.base_url, path));
                self.api_call(request, *assert_status).await
            }
            Step::ApiPost {
                path,
                body,
                assert_status,
            } => {
                let request = ApiRequest::post_json(join_url(&self.base_url, path), body.clone());
                self.api_call(request, *assert_status).await
            }
        }
    }

    /// Records the URL from just before the click in `previous_url`.
    async fn click(&self, locator: Locator, previous_url: &mut String) -> StepResult {
        if !self.page.is_visible(&locator).await.unwrap_or(false) {
            return Err(format!("{} is not visible", locator));
        }
        *previous_url = self.current_url().await?;
        self.page.click(&locator).await.map_err(|e| e.to_string())?;
        if let Err(e) = self.page.wait_for_idle(IDLE_TIMEOUT).await {
            debug!("No idle network after click on {}: {}", locator, e);
        }
        self.page.wait(self.settle).await;
        Ok(None)
    }

    async fn fill(&self, field: &str, value: &str) -> std::result::Result<FillStrategy, String> {
        for (strategy, locator) in fill_strategies(field) {
            let visible = self.page.is_visible(&locator).await.unwrap_or(false);
            if !visible {
                continue;
            }
            match self.page.fill(&locator, value).await {
                Ok(()) => {
                    debug!("Filled '{}' via {}", field, strategy.description());
                    return Ok(strategy);
                }
                Err(e) => debug!("Fill of '{}' via {} failed: {}", field, strategy.description(), e),
            }
        }
        Err(format!("Could not find field: {}", field))
    }

    async fn expect_visible(&self, locator: &Locator, expected: bool) -> StepResult {
        let visible = self
            .page
            .is_visible(locator)
            .await
            .map_err(|e| e.to_string())?;
        match (visible, expected) {
            (true, true) | (false, false) => Ok(None),
            (false, true) => Err(format!("{} is not visible", locator)),
            (true, false) => Err(format!("{} is visible", locator)),
        }
    }

    async fn api_call(&self, mut request: ApiRequest, assert_status: Option<u16>) -> StepResult {
        for (name, value) in &self.auth_headers {
            request = request.with_header(name.clone(), value.clone());
        }
        let url = request.url.clone();
        let response = self.page.request(request).await.map_err(|e| e.to_string())?;
        match assert_status {
            Some(expected) if expected != response.status => Err(format!(
                "{} answered {}, expected {}",
                url, response.status, expected
            )),
            _ => Ok(None),
        }
    }
}
