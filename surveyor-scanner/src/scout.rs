//! Live exploration of a target right before test generation, so the
//! generated tests refer to what the site shows now rather than at scan time.

use crate::browser::{BrowserLauncher, BrowserPage, LaunchOptions, Locator, Role};
use crate::dom::{self, selector};
use crate::error::{Result, ScanError};
use crate::extractor::{ExtractionPolicy, UiSnapshot, capture_ui};
use crate::normalize::same_origin;
use scraper::Html;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// Paths worth checking even when nothing links to them.
pub const COMMON_PATHS: &[&str] = &["/login", "/signin", "/signup", "/register", "/pricing", "/plans"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoutedPage {
    pub url: String,
    pub title: String,
    pub status_code: u16,
    pub ui_elements: UiSnapshot,
}

pub struct Scout {
    budget: Duration,
    max_targets: usize,
    settle: Duration,
    navigation_timeout: Duration,
}

impl Default for Scout {
    fn default() -> Self {
        Self {
            budget: Duration::from_secs(45),
            max_targets: 12,
            settle: Duration::from_millis(800),
            navigation_timeout: Duration::from_secs(15),
        }
    }
}

impl Scout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Launch a page, explore `base_url` and close the page again. Failures
    /// yield whatever was gathered before them, or nothing.
    pub async fn scout_target(
        &self,
        launcher: &dyn BrowserLauncher,
        options: &LaunchOptions,
        base_url: &str,
    ) -> Vec<ScoutedPage> {
        let page = match launcher.launch(options).await {
            Ok(page) => page,
            Err(e) => {
                warn!("Scout could not launch a browser: {}", e);
                return Vec::new();
            }
        };

        let mut scouted = Vec::new();
        if let Err(e) = self.explore(page.as_ref(), base_url, &mut scouted).await {
            warn!("Scouting {} stopped early: {}", base_url, e);
        }
        if let Err(e) = page.close().await {
            debug!("Closing scout page failed: {}", e);
        }
        info!("Scout done: {} pages", scouted.len());
        scouted
    }

    async fn explore(
        &self,
        page: &dyn BrowserPage,
        base_url: &str,
        scouted: &mut Vec<ScoutedPage>,
    ) -> Result<()> {
        let started = Instant::now();
        let base = Url::parse(base_url)
            .map_err(|e| ScanError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        let policy = ExtractionPolicy::scouting();
        let mut visited = HashSet::new();

        let navigation = page.goto(base_url, self.navigation_timeout).await?;
        let _ = page.wait_for_idle(self.navigation_timeout).await;
        page.wait(self.settle).await;
        let home_url = page.current_url().await?;
        scouted.push(self.capture(page, &policy, navigation.status).await);
        visited.insert(home_url.clone());

        let targets = click_targets(&page.content().await.unwrap_or_default());
        debug!("Scout found {} clickable targets", targets.len());

        for locator in targets.into_iter().take(self.max_targets) {
            if started.elapsed() > self.budget {
                info!("Scout budget reached");
                return Ok(());
            }
            if page.current_url().await? != home_url {
                if let Err(e) = page.goto(base_url, self.navigation_timeout).await {
                    debug!("Scout could not return home: {}", e);
                    continue;
                }
                page.wait(self.settle).await;
            }
            if !page.is_visible(&locator).await.unwrap_or(false) {
                continue;
            }
            if let Err(e) = page.click(&locator).await {
                debug!("Scout click on {} failed: {}", locator, e);
                continue;
            }
            let _ = page.wait_for_idle(Duration::from_secs(8)).await;
            page.wait(self.settle).await;

            let now = page.current_url().await?;
            if !visited.contains(&now) && same_origin(&now, &base) {
                debug!("Scout clicked {} and reached {}", locator, now);
                scouted.push(self.capture(page, &policy, 200).await);
                visited.insert(now);
            }
        }

        let root = base_url.trim_end_matches('/');
        for path in COMMON_PATHS {
            if started.elapsed() > self.budget {
                info!("Scout budget reached");
                break;
            }
            let url = format!("{}{}", root, path);
            if visited.contains(&url) {
                continue;
            }
            let status = match page.goto(&url, self.navigation_timeout).await {
                Ok(navigation) if navigation.status < 400 => navigation.status,
                _ => continue,
            };
            page.wait(self.settle).await;
            let actual = page.current_url().await?;
            if visited.contains(&actual) || !same_origin(&actual, &base) {
                continue;
            }
            let captured = self.capture(page, &policy, status).await;
            if !captured.ui_elements.inputs.is_empty() || captured.ui_elements.buttons.len() > 2 {
                debug!("Scout kept common path {}", path);
                scouted.push(captured);
                visited.insert(actual);
            }
        }
        Ok(())
    }

    async fn capture(
        &self,
        page: &dyn BrowserPage,
        policy: &ExtractionPolicy,
        status_code: u16,
    ) -> ScoutedPage {
        ScoutedPage {
            url: page.current_url().await.unwrap_or_default(),
            title: page.title().await.unwrap_or_default(),
            status_code,
            ui_elements: capture_ui(page, policy).await,
        }
    }
}

/// Links with a real `href`, then buttons, deduplicated by label.
fn click_targets(html: &str) -> Vec<Locator> {
    let doc = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    for el in doc.select(&selector("a[href]")) {
        let text = dom::truncate(&dom::text_of(el), 60);
        let href = el.value().attr("href").unwrap_or_default().trim();
        if !text.is_empty() && href != "#" && !href.is_empty() && seen.insert(text.clone()) {
            targets.push(Locator::role(Role::Link, text));
        }
    }
    for el in doc.select(&selector("button, [role=\"button\"], input[type=\"submit\"]")) {
        let text = dom::text_of(el);
        let text = if text.is_empty() {
            el.value().attr("value").unwrap_or_default().trim().to_string()
        } else {
            text
        };
        let text = dom::truncate(&text, 60);
        if !text.is_empty() && seen.insert(text.clone()) {
            targets.push(Locator::role(Role::Button, text));
        }
    }
    targets
}
