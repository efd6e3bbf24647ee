//! A [`BrowserPage`] backed by plain HTTP and parsed markup.
//!
//! No script runs, so client-side routes and XHR traffic are invisible; the
//! driver still covers server-rendered sites end to end: navigation, link
//! clicks, form filling and submission, header and cookie injection. Every
//! document it loads is reported to response subscribers.

use crate::browser::{
    ApiRequest, ApiResponse, BrowserLauncher, BrowserPage, Cookie, HttpMethod, LaunchOptions,
    Locator, Navigation, NetworkResponse, ResourceKind,
};
use crate::dom::{self, selector};
use crate::error::{Result, ScanError};
use crate::normalize;
use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use scraper::{ElementRef, Html};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;
use url::Url;

/// Launches [`StaticPage`]s.
#[derive(Debug, Clone, Default)]
pub struct StaticBrowser;

#[async_trait]
impl BrowserLauncher for StaticBrowser {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserPage>> {
        Ok(Box::new(StaticPage::new(options)?))
    }
}

#[derive(Debug, Default)]
struct Document {
    url: String,
    body: String,
    /// Values typed into controls, keyed by the control's document-order index.
    values: HashMap<usize, String>,
    focused: Option<usize>,
}

pub struct StaticPage {
    client: Client,
    jar: Arc<Jar>,
    navigation_timeout: Duration,
    document: Mutex<Document>,
    extra_headers: Mutex<HashMap<String, String>>,
    subscribers: StdMutex<Vec<UnboundedSender<NetworkResponse>>>,
}

const CONTROLS: &str = "input, textarea, select";

impl StaticPage {
    pub fn new(options: &LaunchOptions) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .user_agent(options.user_agent.clone())
            .timeout(options.navigation_timeout)
            .connect_timeout(options.navigation_timeout / 2)
            .danger_accept_invalid_certs(options.ignore_https_errors)
            .cookie_provider(jar.clone())
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self {
            client,
            jar,
            navigation_timeout: options.navigation_timeout,
            document: Mutex::new(Document::default()),
            extra_headers: Mutex::new(HashMap::new()),
            subscribers: StdMutex::new(Vec::new()),
        })
    }

    /// A page already showing `html` at `url`, for fixtures.
    pub fn from_html(url: &str, html: &str) -> Result<Self> {
        let mut page = Self::new(&LaunchOptions::default())?;
        let doc = page.document.get_mut();
        doc.url = url.to_string();
        doc.body = html.to_string();
        Ok(page)
    }

    fn notify(&self, response: NetworkResponse) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.retain(|tx| tx.send(response.clone()).is_ok());
    }

    async fn header_map(&self, extra: &HashMap<String, String>) -> HeaderMap {
        let mut map = HeaderMap::new();
        let context = self.extra_headers.lock().await;
        for (name, value) in context.iter().chain(extra.iter()) {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    map.insert(name, value);
                }
                _ => debug!("Skipping invalid header {}", name),
            }
        }
        map
    }

    /// Send a document request and make its response the current page.
    async fn load(
        &self,
        method: Method,
        url: &str,
        form: Option<Vec<(String, String)>>,
        timeout: Duration,
    ) -> Result<Navigation> {
        let headers = self.header_map(&HashMap::new()).await;
        let mut request = self
            .client
            .request(method.clone(), url)
            .headers(headers)
            .timeout(timeout);
        if let Some(fields) = form {
            request = if method == Method::GET {
                request.query(&fields)
            } else {
                request.form(&fields)
            };
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ScanError::Timeout(timeout.as_millis() as u64, format!("navigating to {}", url))
            } else {
                ScanError::HttpError(e)
            }
        })?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        self.notify(NetworkResponse {
            method: method.to_string(),
            url: final_url.clone(),
            status,
            resource: ResourceKind::Document,
            content_type,
        });

        let mut doc = self.document.lock().await;
        *doc = Document {
            url: final_url.clone(),
            body,
            values: HashMap::new(),
            focused: None,
        };

        Ok(Navigation {
            status,
            url: final_url,
        })
    }

    async fn submit(&self, submission: Submission) -> Result<()> {
        debug!("Submitting form to {} {}", submission.method, submission.action);
        self.load(
            submission.method,
            &submission.action,
            Some(submission.data),
            self.navigation_timeout,
        )
        .await
        .map(|_| ())
    }
}

/// A form submission resolved from the current document.
struct Submission {
    method: Method,
    action: String,
    data: Vec<(String, String)>,
}

/// Name/value pairs a browser would submit for `form`.
fn form_data(html: &Html, form: ElementRef<'_>, values: &HashMap<usize, String>) -> Vec<(String, String)> {
    let option_sel = selector("option");
    let mut data = Vec::new();

    for el in form.select(&selector(CONTROLS)) {
        let Some(name) = el.value().attr("name").filter(|n| !n.is_empty()) else {
            continue;
        };
        if el.value().attr("disabled").is_some() {
            continue;
        }
        let typed = control_index(html, el).and_then(|i| values.get(&i)).cloned();

        let value = match dom::control_type(el).as_str() {
            "checkbox" | "radio" => {
                if el.value().attr("checked").is_none() {
                    continue;
                }
                el.value().attr("value").unwrap_or("on").to_string()
            }
            "submit" | "button" | "reset" | "image" | "file" => continue,
            "select-one" | "select-multiple" => match typed {
                Some(v) => v,
                None => {
                    let options: Vec<_> = el.select(&option_sel).collect();
                    let chosen = options
                        .iter()
                        .find(|o| o.value().attr("selected").is_some())
                        .or(options.first());
                    match chosen {
                        Some(o) => option_value(*o),
                        None => continue,
                    }
                }
            },
            "textarea" => typed.unwrap_or_else(|| el.text().collect()),
            _ => typed.unwrap_or_else(|| el.value().attr("value").unwrap_or_default().to_string()),
        };
        data.push((name.to_string(), value));
    }
    data
}

fn option_value(option: ElementRef<'_>) -> String {
    option
        .value()
        .attr("value")
        .map(str::to_string)
        .unwrap_or_else(|| dom::text_of(option))
}

fn submission(
    page_url: &str,
    html: &Html,
    form: ElementRef<'_>,
    values: &HashMap<usize, String>,
) -> Submission {
    let action = form
        .value()
        .attr("action")
        .filter(|a| !a.trim().is_empty())
        .and_then(|a| normalize::resolve_href(page_url, a))
        .unwrap_or_else(|| page_url.to_string());
    let method = match form.value().attr("method") {
        Some(m) if m.eq_ignore_ascii_case("post") => Method::POST,
        _ => Method::GET,
    };
    Submission {
        method,
        action,
        data: form_data(html, form, values),
    }
}

/// The owning `<form>` of an element.
fn enclosing_form(el: ElementRef<'_>) -> Option<ElementRef<'_>> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().name() == "form")
}

fn control_index(html: &Html, el: ElementRef<'_>) -> Option<usize> {
    html.select(&selector(CONTROLS)).position(|c| c.id() == el.id())
}

enum ClickOutcome {
    Navigate(String),
    Route(String),
    Submit(Submission),
    Nothing,
}

/// Work out what clicking the element at `locator` does. Parsed markup is not
/// `Send`, so this stays synchronous and returns owned data.
fn resolve_click(
    page_url: &str,
    body: &str,
    values: &HashMap<usize, String>,
    locator: &Locator,
) -> Result<ClickOutcome> {
    let html = Html::parse_document(body);
    let el = dom::locate_first(&html, locator)
        .filter(|el| !dom::is_hidden(*el))
        .ok_or_else(|| ScanError::ElementNotFound(locator.to_string()))?;

    let anchor = std::iter::once(el)
        .chain(el.ancestors().filter_map(ElementRef::wrap))
        .find(|a| a.value().name() == "a" && a.value().attr("href").is_some());

    if let Some(a) = anchor {
        let href = a.value().attr("href").unwrap_or_default().trim();
        if let Some(fragment) = href.strip_prefix('#') {
            if !normalize::is_route_fragment(fragment) {
                return Ok(ClickOutcome::Nothing);
            }
            let mut next =
                Url::parse(page_url).map_err(|e| ScanError::InvalidUrl(e.to_string()))?;
            next.set_fragment(Some(fragment));
            return Ok(ClickOutcome::Route(next.to_string()));
        }
        return Ok(match normalize::resolve_href(page_url, href) {
            Some(target) => ClickOutcome::Navigate(target),
            None => ClickOutcome::Nothing,
        });
    }

    let is_submitter =
        matches!(el.value().name(), "button" | "input") && dom::control_type(el) == "submit";
    match enclosing_form(el) {
        Some(form) if is_submitter => Ok(ClickOutcome::Submit(submission(
            page_url, &html, form, values,
        ))),
        _ => Ok(ClickOutcome::Nothing),
    }
}

#[async_trait]
impl BrowserPage for StaticPage {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<Navigation> {
        Url::parse(url).map_err(|e| ScanError::InvalidUrl(format!("{}: {}", url, e)))?;
        self.load(Method::GET, url, None, timeout).await
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.document.lock().await.url.clone())
    }

    async fn title(&self) -> Result<String> {
        let body = self.document.lock().await.body.clone();
        let html = Html::parse_document(&body);
        Ok(html
            .select(&selector("title"))
            .next()
            .map(dom::text_of)
            .unwrap_or_default())
    }

    async fn content(&self) -> Result<String> {
        Ok(self.document.lock().await.body.clone())
    }

    async fn is_visible(&self, locator: &Locator) -> Result<bool> {
        let body = self.document.lock().await.body.clone();
        let html = Html::parse_document(&body);
        Ok(dom::first_is_visible(&html, locator))
    }

    async fn click(&self, locator: &Locator) -> Result<()> {
        let outcome = {
            let doc = self.document.lock().await;
            resolve_click(&doc.url, &doc.body, &doc.values, locator)?
        };

        match outcome {
            ClickOutcome::Navigate(target) => self
                .load(Method::GET, &target, None, self.navigation_timeout)
                .await
                .map(|_| ()),
            ClickOutcome::Route(target) => {
                self.document.lock().await.url = target;
                Ok(())
            }
            ClickOutcome::Submit(submission) => self.submit(submission).await,
            ClickOutcome::Nothing => Ok(()),
        }
    }

    async fn fill(&self, locator: &Locator, value: &str) -> Result<()> {
        let mut doc = self.document.lock().await;
        let html = Html::parse_document(&doc.body);
        let el = dom::locate_first(&html, locator)
            .filter(|el| !dom::is_hidden(*el))
            .ok_or_else(|| ScanError::ElementNotFound(locator.to_string()))?;
        if !matches!(el.value().name(), "input" | "textarea") {
            return Err(ScanError::Browser(format!(
                "element {} is not an input",
                locator
            )));
        }
        let index = control_index(&html, el)
            .ok_or_else(|| ScanError::ElementNotFound(locator.to_string()))?;
        doc.values.insert(index, value.to_string());
        doc.focused = Some(index);
        Ok(())
    }

    async fn select_option(&self, locator: &Locator, label: &str) -> Result<()> {
        let mut doc = self.document.lock().await;
        let html = Html::parse_document(&doc.body);
        let el = dom::locate_first(&html, locator)
            .filter(|el| el.value().name() == "select")
            .ok_or_else(|| ScanError::ElementNotFound(locator.to_string()))?;
        let option = el
            .select(&selector("option"))
            .find(|o| dom::text_of(*o) == label.trim() || o.value().attr("value") == Some(label))
            .ok_or_else(|| ScanError::ElementNotFound(format!("option {:?} in {}", label, locator)))?;
        let value = option
            .value()
            .attr("value")
            .map(str::to_string)
            .unwrap_or_else(|| dom::text_of(option));
        let index = control_index(&html, el)
            .ok_or_else(|| ScanError::ElementNotFound(locator.to_string()))?;
        doc.values.insert(index, value);
        Ok(())
    }

    async fn press_enter(&self) -> Result<()> {
        let pending = {
            let doc = self.document.lock().await;
            doc.focused.and_then(|index| {
                let html = Html::parse_document(&doc.body);
                html.select(&selector(CONTROLS))
                    .nth(index)
                    .and_then(enclosing_form)
                    .map(|form| submission(&doc.url, &html, form, &doc.values))
            })
        };
        match pending {
            Some(submission) => self.submit(submission).await,
            None => Ok(()),
        }
    }

    async fn wait_for_idle(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn set_extra_headers(&self, headers: HashMap<String, String>) -> Result<()> {
        self.extra_headers.lock().await.extend(headers);
        Ok(())
    }

    async fn add_cookie(&self, cookie: Cookie) -> Result<()> {
        let scope = Url::parse(&format!("http://{}{}", cookie.domain, cookie.path))
            .map_err(|e| ScanError::InvalidUrl(format!("cookie domain {}: {}", cookie.domain, e)))?;
        self.jar.add_cookie_str(
            &format!("{}={}; Path={}", cookie.name, cookie.value, cookie.path),
            &scope,
        );
        Ok(())
    }

    fn subscribe_responses(&self) -> UnboundedReceiver<NetworkResponse> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(tx);
        rx
    }

    async fn request(&self, request: ApiRequest) -> Result<ApiResponse> {
        let headers = self.header_map(&request.headers).await;
        let method = match request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        };
        let mut builder = self
            .client
            .request(method, &request.url)
            .headers(headers)
            .timeout(request.timeout);
        if let Some(json) = &request.json {
            builder = builder.json(json);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ScanError::Timeout(request.timeout.as_millis() as u64, request.url.clone())
            } else {
                ScanError::HttpError(e)
            }
        })?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        Ok(ApiResponse {
            status,
            content_type,
            body,
        })
    }

    async fn close(&self) -> Result<()> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        Ok(())
    }
}
