use crate::auth::authenticate;
use crate::classifier::{classify_apis, classify_forms, classify_pages};
use crate::db::Database;
use crate::error::{CoreError, Result};
use crate::events::{Channel, EventSink};
use crate::model::{ScanStats, Target};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use surveyor_scanner::auth_detect::detect_auth_page;
use surveyor_scanner::forms::detect_page_forms;
use surveyor_scanner::interceptor::probe_common_apis;
use surveyor_scanner::{ApiRecorder, BrowserLauncher, BrowserPage, Crawler, LaunchOptions};
use tracing::{debug, info, warn};
use url::Url;

/// Runs one scan end to end: launch, authenticate, record traffic, crawl,
/// analyse pages, probe APIs, classify and store.
pub struct DiscoveryOrchestrator {
    launcher: Arc<dyn BrowserLauncher>,
    launch_options: LaunchOptions,
    crawler: Crawler,
    analysis_timeout: Duration,
    probe_timeout: Duration,
}

impl DiscoveryOrchestrator {
    pub fn new(launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            launcher,
            launch_options: LaunchOptions::default(),
            crawler: Crawler::new(),
            analysis_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_launch_options(mut self, options: LaunchOptions) -> Self {
        self.launch_options = options;
        self
    }

    pub fn with_crawler(mut self, crawler: Crawler) -> Self {
        self.crawler = crawler;
        self
    }

    pub fn with_analysis_timeout(mut self, timeout: Duration) -> Self {
        self.analysis_timeout = timeout;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Execute scan `scan_id` for `target`. The scan row always ends in a
    /// terminal state; on failure the error is also returned. Records stored
    /// before a failure are kept.
    pub async fn run(
        &self,
        db: &Database,
        events: &dyn EventSink,
        scan_id: i64,
        target: &Target,
    ) -> Result<ScanStats> {
        let mut page_slot: Option<Box<dyn BrowserPage>> = None;
        let outcome = self
            .pipeline(db, events, scan_id, target, &mut page_slot)
            .await;

        if let Some(page) = page_slot.take()
            && let Err(e) = page.close().await
        {
            debug!("Closing browser for scan {} failed: {}", scan_id, e);
        }

        match outcome {
            Ok(stats) => {
                db.finish_scan(scan_id, &stats)?;
                info!(
                    "Scan {} done: {} pages, {} APIs, {} forms",
                    scan_id, stats.pages, stats.apis, stats.forms
                );
                events.emit(Channel::Scan, scan_id, "done", json!(stats));
                Ok(stats)
            }
            Err(e) => {
                let message = e.to_string();
                warn!("Scan {} failed: {}", scan_id, message);
                if let Err(db_err) = db.fail_scan(scan_id, &message) {
                    warn!("Could not record failure of scan {}: {}", scan_id, db_err);
                }
                events.emit(Channel::Scan, scan_id, "error", json!({ "message": message }));
                Err(e)
            }
        }
    }

    async fn pipeline(
        &self,
        db: &Database,
        events: &dyn EventSink,
        scan_id: i64,
        target: &Target,
        page_slot: &mut Option<Box<dyn BrowserPage>>,
    ) -> Result<ScanStats> {
        let base = Url::parse(&target.base_url)
            .map_err(|e| CoreError::Config(format!("invalid base URL {}: {}", target.base_url, e)))?;

        events.progress(Channel::Scan, scan_id, 5, "Launching browser...");
        let launched = self.launcher.launch(&self.launch_options).await?;
        let page: &dyn BrowserPage = &**page_slot.insert(launched);

        authenticate(page, &target.base_url, target.auth_type, &target.auth_config).await?;

        events.progress(Channel::Scan, scan_id, 10, "Starting API interceptor...");
        let recorder = ApiRecorder::start(page, base.clone());

        events.progress(Channel::Scan, scan_id, 15, "Crawling pages...");
        let mut pages = self.crawler.crawl(page, &target.base_url).await?;

        let total = pages.len();
        events.progress(
            Channel::Scan,
            scan_id,
            50,
            &format!("Found {} pages. Detecting forms...", total),
        );

        let mut forms = Vec::new();
        for (i, result) in pages.iter_mut().enumerate() {
            if i % 5 == 0 {
                let percent = 50 + ((i as f64 / total as f64) * 20.0).round() as u8;
                events.progress(
                    Channel::Scan,
                    scan_id,
                    percent,
                    &format!("Analyzing page {}/{}...", i + 1, total),
                );
            }
            if let Err(e) = page.goto(&result.url, self.analysis_timeout).await {
                debug!("Skipping analysis of {}: {}", result.url, e);
                continue;
            }
            let page_forms = detect_page_forms(page, &result.url).await;
            if !page_forms.is_empty() {
                result.has_forms = true;
            }
            forms.extend(page_forms);
            result.is_auth_page = detect_auth_page(page).await;
        }

        events.progress(Channel::Scan, scan_id, 75, "Probing common API paths...");
        let mut apis = recorder.stop();
        apis.extend(probe_common_apis(page, &base, self.probe_timeout).await);

        events.progress(Channel::Scan, scan_id, 85, "Classifying and storing results...");
        let pages = classify_pages(pages);
        let apis = classify_apis(apis);
        let forms = classify_forms(forms);

        for result in &pages {
            db.insert_page(scan_id, result)?;
            events.emit(
                Channel::Scan,
                scan_id,
                "page",
                json!({ "url": result.url, "status": result.status_code }),
            );
        }
        for api in &apis {
            db.insert_api(scan_id, api)?;
            events.emit(
                Channel::Scan,
                scan_id,
                "api",
                json!({ "method": api.method, "url": api.url }),
            );
        }
        for form in &forms {
            db.insert_form(scan_id, form)?;
            events.emit(
                Channel::Scan,
                scan_id,
                "form",
                json!({ "page_url": form.page_url, "action": form.action }),
            );
        }

        Ok(ScanStats {
            pages: pages.len(),
            apis: apis.len(),
            forms: forms.len(),
            auth_pages: pages.iter().filter(|p| p.is_auth_page).count(),
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::model::{AuthConfig, AuthStrategy, Status};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use surveyor_scanner::ScanError;
    use surveyor_scanner::StaticPage;

    struct FailingLauncher;

    #[async_trait]
    impl BrowserLauncher for FailingLauncher {
        async fn launch(
            &self,
            _options: &LaunchOptions,
        ) -> surveyor_scanner::error::Result<Box<dyn BrowserPage>> {
            Err(ScanError::Browser("no browser available".into()))
        }
    }

    /// Launches a static page whose `close` is observable.
    struct TrackingLauncher {
        closed: Arc<AtomicBool>,
    }

    struct TrackedPage {
        inner: StaticPage,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl BrowserLauncher for TrackingLauncher {
        async fn launch(
            &self,
            options: &LaunchOptions,
        ) -> surveyor_scanner::error::Result<Box<dyn BrowserPage>> {
            Ok(Box::new(TrackedPage {
                inner: StaticPage::new(options)?,
                closed: self.closed.clone(),
            }))
        }
    }

    #[async_trait]
    impl BrowserPage for TrackedPage {
        async fn goto(
            &self,
            url: &str,
            timeout: Duration,
        ) -> surveyor_scanner::error::Result<surveyor_scanner::browser::Navigation> {
            self.inner.goto(url, timeout).await
        }
        async fn current_url(&self) -> surveyor_scanner::error::Result<String> {
            self.inner.current_url().await
        }
        async fn title(&self) -> surveyor_scanner::error::Result<String> {
            self.inner.title().await
        }
        async fn content(&self) -> surveyor_scanner::error::Result<String> {
            self.inner.content().await
        }
        async fn is_visible(
            &self,
            locator: &surveyor_scanner::Locator,
        ) -> surveyor_scanner::error::Result<bool> {
            self.inner.is_visible(locator).await
        }
        async fn click(&self, locator: &surveyor_scanner::Locator) -> surveyor_scanner::error::Result<()> {
            self.inner.click(locator).await
        }
        async fn fill(
            &self,
            locator: &surveyor_scanner::Locator,
            value: &str,
        ) -> surveyor_scanner::error::Result<()> {
            self.inner.fill(locator, value).await
        }
        async fn select_option(
            &self,
            locator: &surveyor_scanner::Locator,
            label: &str,
        ) -> surveyor_scanner::error::Result<()> {
            self.inner.select_option(locator, label).await
        }
        async fn press_enter(&self) -> surveyor_scanner::error::Result<()> {
            self.inner.press_enter().await
        }
        async fn wait_for_idle(&self, timeout: Duration) -> surveyor_scanner::error::Result<()> {
            self.inner.wait_for_idle(timeout).await
        }
        async fn set_extra_headers(
            &self,
            headers: std::collections::HashMap<String, String>,
        ) -> surveyor_scanner::error::Result<()> {
            self.inner.set_extra_headers(headers).await
        }
        async fn add_cookie(
            &self,
            cookie: surveyor_scanner::browser::Cookie,
        ) -> surveyor_scanner::error::Result<()> {
            self.inner.add_cookie(cookie).await
        }
        fn subscribe_responses(
            &self,
        ) -> tokio::sync::mpsc::UnboundedReceiver<surveyor_scanner::browser::NetworkResponse> {
            self.inner.subscribe_responses()
        }
        async fn request(
            &self,
            request: surveyor_scanner::browser::ApiRequest,
        ) -> surveyor_scanner::error::Result<surveyor_scanner::browser::ApiResponse> {
            self.inner.request(request).await
        }
        async fn close(&self) -> surveyor_scanner::error::Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            self.inner.close().await
        }
    }

    fn target(db: &Database, base_url: &str, auth: AuthStrategy) -> Target {
        let id = db
            .create_target("demo", base_url, auth, &AuthConfig::default())
            .unwrap();
        db.get_target(id).unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_launch_failure_marks_scan_error() {
        let db = Database::open_in_memory().unwrap();
        let target = target(&db, "http://127.0.0.1:9", AuthStrategy::None);
        let scan_id = db.create_scan(target.id).unwrap();
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        let orchestrator = DiscoveryOrchestrator::new(Arc::new(FailingLauncher));
        let err = orchestrator.run(&db, &bus, scan_id, &target).await.unwrap_err();
        assert!(err.to_string().contains("no browser available"));

        let scan = db.get_scan(scan_id).unwrap().unwrap();
        assert_eq!(scan.status, Status::Error);
        let stats = scan.stats.unwrap();
        assert!(stats.error.unwrap().contains("no browser available"));

        assert_eq!(rx.recv().await.unwrap().name, "progress");
        let last = rx.recv().await.unwrap();
        assert_eq!(last.name, "error");
        assert!(last.payload["message"].as_str().unwrap().contains("no browser"));
    }

    #[tokio::test]
    async fn test_auth_failure_closes_browser() {
        let db = Database::open_in_memory().unwrap();
        // Basic auth without a username is rejected after launch.
        let target = target(&db, "http://127.0.0.1:9", AuthStrategy::Basic);
        let scan_id = db.create_scan(target.id).unwrap();
        let closed = Arc::new(AtomicBool::new(false));

        let orchestrator = DiscoveryOrchestrator::new(Arc::new(TrackingLauncher {
            closed: closed.clone(),
        }));
        let err = orchestrator
            .run(&db, &crate::events::NullSink, scan_id, &target)
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::Config(_)));
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(db.get_scan(scan_id).unwrap().unwrap().status, Status::Error);
    }

    #[tokio::test]
    async fn test_invalid_base_url_is_config_error() {
        let db = Database::open_in_memory().unwrap();
        let target = target(&db, "not a url", AuthStrategy::None);
        let scan_id = db.create_scan(target.id).unwrap();

        let orchestrator = DiscoveryOrchestrator::new(Arc::new(FailingLauncher));
        let err = orchestrator
            .run(&db, &crate::events::NullSink, scan_id, &target)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }
}
