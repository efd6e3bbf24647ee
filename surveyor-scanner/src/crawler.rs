use crate::browser::{BrowserPage, Locator, Role};
use crate::dom::{self, selector};
use crate::error::{Result, ScanError};
use crate::extractor::{ExtractionPolicy, extract_ui};
use crate::normalize::{normalize, resolve_href, same_origin};
use crate::result::PageResult;
use scraper::Html;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// Called before each page is visited with the number of pages recorded so
/// far and the URL about to be loaded.
pub type ProgressCallback = Arc<dyn Fn(usize, String) + Send + Sync>;

/// Elements that look like client-side navigation: nav/menu/CTA elements
/// whose `href` does not lead anywhere by itself.
const SPA_CANDIDATES: &str = "nav a, nav button, header a, header button, \
    [role=\"navigation\"] a, [role=\"navigation\"] button, \
    [class*=\"nav\"] a, [class*=\"nav\"] button, [class*=\"menu\"] a, [class*=\"menu\"] button, \
    a[class*=\"cta\"], button[class*=\"cta\"], a[class*=\"btn\"], button[class*=\"btn\"]";

const MAX_SPA_CANDIDATES: usize = 12;

/// Sequential breadth-first crawler driving a single browser page.
pub struct Crawler {
    max_depth: usize,
    max_pages: usize,
    navigation_timeout: Duration,
    idle_timeout: Duration,
    render_delay: Duration,
    spa_discovery: bool,
    policy: ExtractionPolicy,
    progress_callback: Option<ProgressCallback>,
}

/// State owned by one crawl invocation.
struct CrawlState {
    visited: HashSet<String>,
    queue: VecDeque<(String, usize)>,
    results: Vec<PageResult>,
}

impl CrawlState {
    fn new(start: String) -> Self {
        Self {
            visited: HashSet::new(),
            queue: VecDeque::from([(start, 0)]),
            results: Vec::new(),
        }
    }

    fn enqueue(&mut self, url: String, depth: usize) {
        if !self.visited.contains(&url) {
            self.queue.push_back((url, depth));
        }
    }
}

impl Crawler {
    pub fn new() -> Self {
        Self {
            max_depth: 3,
            max_pages: 100,
            navigation_timeout: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(8),
            render_delay: Duration::from_millis(800),
            spa_discovery: true,
            policy: ExtractionPolicy::crawl(),
            progress_callback: None,
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_pages(mut self, pages: usize) -> Self {
        self.max_pages = pages;
        self
    }

    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    /// Delay after an SPA click settles, giving client-side rendering time to finish.
    pub fn with_render_delay(mut self, delay: Duration) -> Self {
        self.render_delay = delay;
        self
    }

    pub fn with_spa_discovery(mut self, enabled: bool) -> Self {
        self.spa_discovery = enabled;
        self
    }

    pub fn with_policy(mut self, policy: ExtractionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub async fn crawl(&self, page: &dyn BrowserPage, base_url: &str) -> Result<Vec<PageResult>> {
        let base = Url::parse(base_url)
            .map_err(|e| ScanError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        info!(
            "Starting crawl of {} (max depth {}, max pages {})",
            base_url, self.max_depth, self.max_pages
        );

        let mut state = CrawlState::new(normalize(base_url));

        while let Some((url, depth)) = state.queue.pop_front() {
            if state.results.len() >= self.max_pages {
                break;
            }
            if state.visited.contains(&url) || depth > self.max_depth {
                continue;
            }
            state.visited.insert(url.clone());

            if let Some(ref callback) = self.progress_callback {
                callback(state.results.len(), url.clone());
            }

            let (result, links) = self.visit(page, &url, &base, depth).await;
            state.results.push(result);

            for link in links {
                state.enqueue(link, depth + 1);
            }

            if depth == 0 && self.spa_discovery && depth < self.max_depth {
                for route in self.discover_spa_routes(page, &url, &base).await {
                    state.enqueue(route, depth + 1);
                }
            }
        }

        info!("Crawl complete. Visited {} pages", state.results.len());
        Ok(state.results)
    }

    /// Load one page and record it. Returns the same-origin links to follow.
    async fn visit(
        &self,
        page: &dyn BrowserPage,
        url: &str,
        base: &Url,
        depth: usize,
    ) -> (PageResult, Vec<String>) {
        debug!("Visiting {} at depth {}", url, depth);
        let start = Instant::now();

        let navigation = match page.goto(url, self.navigation_timeout).await {
            Ok(navigation) => navigation,
            Err(e) => {
                warn!("Crawl error for {}: {}", url, e);
                return (PageResult::with_error(url.to_string(), e.to_string()), Vec::new());
            }
        };
        let elapsed = start.elapsed();

        let title = page.title().await.unwrap_or_default();
        let html = page.content().await.unwrap_or_default();

        let mut result = PageResult::new(url.to_string());
        result.title = title;
        result.status_code = navigation.status;
        result.response_time_ms = elapsed.as_millis() as u64;
        result.ui_elements = extract_ui(&html, &self.policy);

        let doc = Html::parse_document(&html);
        result.has_forms = doc.select(&selector("form")).next().is_some();

        let mut links = Vec::new();
        if depth < self.max_depth {
            for anchor in doc.select(&selector("a[href]")) {
                let href = anchor.value().attr("href").unwrap_or_default();
                if let Some(absolute) = resolve_href(&navigation.url, href)
                    && same_origin(&absolute, base)
                {
                    links.push(normalize(&absolute));
                }
            }
        }

        (result, links)
    }

    /// Click through navigation-like elements that have no real `href` and
    /// collect the same-origin URLs they lead to.
    async fn discover_spa_routes(
        &self,
        page: &dyn BrowserPage,
        start_url: &str,
        base: &Url,
    ) -> Vec<String> {
        let html = match page.content().await {
            Ok(html) => html,
            Err(e) => {
                debug!("SPA discovery skipped: {}", e);
                return Vec::new();
            }
        };
        let candidates = spa_candidates(&html);
        if candidates.is_empty() {
            return Vec::new();
        }
        debug!("Exploring {} SPA navigation candidates", candidates.len());

        let mut routes: Vec<String> = Vec::new();
        for locator in candidates {
            if let Err(e) = self.return_to(page, start_url).await {
                debug!("Could not return to {}: {}", start_url, e);
                break;
            }

            match page.is_visible(&locator).await {
                Ok(true) => {}
                _ => continue,
            }
            if let Err(e) = page.click(&locator).await {
                debug!("SPA click on {} failed: {}", locator, e);
                continue;
            }
            let _ = page.wait_for_idle(self.idle_timeout).await;
            page.wait(self.render_delay).await;

            let Ok(now) = page.current_url().await else {
                continue;
            };
            let route = normalize(&now);
            if route != start_url && same_origin(&route, base) && !routes.contains(&route) {
                debug!("SPA route discovered via {}: {}", locator, route);
                routes.push(route);
            }
        }

        if let Err(e) = self.return_to(page, start_url).await {
            debug!("Could not return to {}: {}", start_url, e);
        }
        routes
    }

    async fn return_to(&self, page: &dyn BrowserPage, start_url: &str) -> Result<()> {
        let current = page.current_url().await?;
        if normalize(&current) != start_url {
            page.goto(start_url, self.navigation_timeout).await?;
        }
        Ok(())
    }
}

impl Default for Crawler {
    fn default() -> Self {
        Self::new()
    }
}

fn is_dead_href(href: Option<&str>) -> bool {
    match href.map(str::trim) {
        None | Some("") | Some("#") => true,
        Some(h) => h
            .trim_end_matches(';')
            .eq_ignore_ascii_case("javascript:void(0)"),
    }
}

/// Locators for SPA navigation candidates, deduplicated by label.
fn spa_candidates(html: &str) -> Vec<Locator> {
    let doc = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for el in doc.select(&selector(SPA_CANDIDATES)) {
        let is_link = el.value().name() == "a";
        if is_link && !is_dead_href(el.value().attr("href")) {
            continue;
        }
        let text = dom::truncate(&dom::text_of(el), 60);
        if text.is_empty() || !seen.insert(text.clone()) {
            continue;
        }
        // A bare <a> without href has no link role.
        let role = if is_link && el.value().attr("href").is_some() {
            Role::Link
        } else if is_link {
            candidates.push(Locator::Text(text));
            continue;
        } else {
            Role::Button
        };
        candidates.push(Locator::role(role, text));
        if candidates.len() >= MAX_SPA_CANDIDATES {
            break;
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{
        ApiRequest, ApiResponse, Cookie, LaunchOptions, Navigation, NetworkResponse,
    };
    use crate::static_driver::StaticPage;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::mpsc::{self, UnboundedReceiver};
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    fn html(body: String) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/html")
            .set_body_string(body)
    }

    async fn site_with_links(count: usize) -> MockServer {
        let server = MockServer::start().await;
        let mut root = String::from("<html><head><title>Root</title></head><body>");
        for i in 1..=count {
            root.push_str(&format!(r#"<a href="/page{}">Page {}</a>"#, i, i));
        }
        root.push_str("</body></html>");

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(html(root))
            .mount(&server)
            .await;
        for i in 1..=count {
            Mock::given(method("GET"))
                .and(path(format!("/page{}", i)))
                .respond_with(html(format!(
                    r#"<html><body><a href="/page{}/deeper">Deeper</a></body></html>"#,
                    i
                )))
                .mount(&server)
                .await;
        }
        server
    }

    #[tokio::test]
    async fn test_bfs_respects_page_budget_in_link_order() {
        let server = site_with_links(10).await;
        let page = StaticPage::new(&LaunchOptions::default()).unwrap();

        let crawler = Crawler::new().with_max_depth(1).with_max_pages(5);
        let results = crawler.crawl(&page, &server.uri()).await.unwrap();

        let urls: Vec<_> = results.iter().map(|r| r.url.clone()).collect();
        let base = server.uri();
        assert_eq!(
            urls,
            vec![
                format!("{}/", base),
                format!("{}/page1", base),
                format!("{}/page2", base),
                format!("{}/page3", base),
                format!("{}/page4", base),
            ]
        );
        assert_eq!(results[0].title, "Root");
        assert_eq!(results[0].status_code, 200);
    }

    #[tokio::test]
    async fn test_bfs_never_exceeds_depth() {
        let server = site_with_links(3).await;
        let page = StaticPage::new(&LaunchOptions::default()).unwrap();

        let results = Crawler::new()
            .with_max_depth(1)
            .crawl(&page, &server.uri())
            .await
            .unwrap();

        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| !r.url.ends_with("/deeper")));
    }

    #[tokio::test]
    async fn test_cross_origin_links_are_not_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(html(
                r#"<a href="http://127.0.0.1:1/nowhere">x</a><a href="/ok">Ok</a><form></form>"#
                    .to_string(),
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(html("<title>Ok</title>".to_string()))
            .mount(&server)
            .await;

        let page = StaticPage::new(&LaunchOptions::default()).unwrap();
        let results = Crawler::new().crawl(&page, &server.uri()).await.unwrap();

        assert_eq!(results.len(), 2);
        assert!(results[0].has_forms);
        assert_eq!(results[1].title, "Ok");
    }

    #[tokio::test]
    async fn test_unreachable_start_is_degraded_result() {
        let page = StaticPage::new(&LaunchOptions::default()).unwrap();
        let results = Crawler::new()
            .with_navigation_timeout(Duration::from_secs(2))
            .crawl(&page, "http://127.0.0.1:1/")
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status_code, 0);
        assert!(results[0].error.is_some());
    }

    #[tokio::test]
    async fn test_invalid_base_url() {
        let page = StaticPage::new(&LaunchOptions::default()).unwrap();
        let err = Crawler::new().crawl(&page, "not a url").await.unwrap_err();
        assert!(matches!(err, ScanError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_progress_callback_sees_every_visit() {
        let server = site_with_links(2).await;
        let page = StaticPage::new(&LaunchOptions::default()).unwrap();
        let seen: Arc<Mutex<Vec<(usize, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        Crawler::new()
            .with_max_depth(1)
            .with_progress_callback(Arc::new(move |done, url| {
                sink.lock().unwrap().push((done, url));
            }))
            .crawl(&page, &server.uri())
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].0, 0);
        assert_eq!(seen[2].0, 2);
    }

    #[test]
    fn test_spa_candidates() {
        let markup = r##"<header><nav>
            <a href="/real">Real link</a>
            <a href="#">Dashboard</a>
            <a href="javascript:void(0)">Reports</a>
            <button>Settings</button>
            <button>Settings</button>
        </nav></header>
        <div class="hero"><a class="cta-primary" href="">Get started</a></div>
        <main><button>Not navigation</button></main>"##;
        let candidates = spa_candidates(markup);
        assert_eq!(
            candidates,
            vec![
                Locator::role(Role::Link, "Dashboard"),
                Locator::role(Role::Link, "Reports"),
                Locator::role(Role::Button, "Settings"),
                Locator::role(Role::Link, "Get started"),
            ]
        );
    }

    /// A single-page app: the DOM never changes, buttons rewrite the URL.
    struct SpaPage {
        url: Mutex<String>,
        routes: HashMap<&'static str, &'static str>,
        gotos: Mutex<Vec<String>>,
    }

    const SPA_HOME: &str = r##"<html><head><title>App</title></head><body>
        <nav><button>Billing</button><button>Team</button><button>Logout</button>
        <a href="#">Hidden thing</a></nav></body></html>"##;

    impl SpaPage {
        fn new() -> Self {
            Self {
                url: Mutex::new(String::new()),
                routes: HashMap::from([
                    ("Billing", "http://spa.test/#/billing"),
                    ("Team", "http://spa.test/#/team"),
                    ("Logout", "http://other.test/bye"),
                ]),
                gotos: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BrowserPage for SpaPage {
        async fn goto(&self, url: &str, _timeout: Duration) -> Result<Navigation> {
            self.gotos.lock().unwrap().push(url.to_string());
            *self.url.lock().unwrap() = url.to_string();
            Ok(Navigation {
                status: 200,
                url: url.to_string(),
            })
        }
        async fn current_url(&self) -> Result<String> {
            Ok(self.url.lock().unwrap().clone())
        }
        async fn title(&self) -> Result<String> {
            Ok("App".into())
        }
        async fn content(&self) -> Result<String> {
            Ok(SPA_HOME.to_string())
        }
        async fn is_visible(&self, locator: &Locator) -> Result<bool> {
            Ok(!matches!(locator, Locator::Role { name, .. } if name == "Hidden thing"))
        }
        async fn click(&self, locator: &Locator) -> Result<()> {
            if let Locator::Role { name, .. } = locator
                && let Some(target) = self.routes.get(name.as_str())
            {
                *self.url.lock().unwrap() = target.to_string();
            }
            Ok(())
        }
        async fn fill(&self, _: &Locator, _: &str) -> Result<()> {
            Ok(())
        }
        async fn select_option(&self, _: &Locator, _: &str) -> Result<()> {
            Ok(())
        }
        async fn press_enter(&self) -> Result<()> {
            Ok(())
        }
        async fn wait_for_idle(&self, _: Duration) -> Result<()> {
            Err(ScanError::Timeout(8000, "network idle".into()))
        }
        async fn wait(&self, _: Duration) {}
        async fn set_extra_headers(&self, _: HashMap<String, String>) -> Result<()> {
            Ok(())
        }
        async fn add_cookie(&self, _: Cookie) -> Result<()> {
            Ok(())
        }
        fn subscribe_responses(&self) -> UnboundedReceiver<NetworkResponse> {
            mpsc::unbounded_channel().1
        }
        async fn request(&self, _: ApiRequest) -> Result<ApiResponse> {
            Err(ScanError::Other("unsupported".into()))
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_spa_routes_are_discovered_at_depth_zero() {
        let page = SpaPage::new();
        let results = Crawler::new()
            .with_max_depth(1)
            .crawl(&page, "http://spa.test/")
            .await
            .unwrap();

        let urls: Vec<_> = results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "http://spa.test/",
                "http://spa.test/#/billing",
                "http://spa.test/#/team",
            ]
        );
        // The crawler goes back to the start page before every click after the first.
        let gotos = page.gotos.lock().unwrap();
        assert!(gotos.iter().filter(|u| u.as_str() == "http://spa.test/").count() >= 3);
    }

    #[tokio::test]
    async fn test_spa_discovery_can_be_disabled() {
        let page = SpaPage::new();
        let results = Crawler::new()
            .with_spa_discovery(false)
            .crawl(&page, "http://spa.test/")
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }
}
