//! Headless Chromium driver.
//!
//! `headless_chrome` is synchronous, so every tab operation runs on the
//! blocking pool. Element operations go through in-page script that resolves
//! [`Locator`]s with the same rules the static driver applies to markup.

use crate::browser::{
    ApiRequest, ApiResponse, BrowserLauncher, BrowserPage, Cookie, LaunchOptions, Locator,
    Navigation, NetworkResponse, ResourceKind,
};
use crate::error::{Result, ScanError};
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Network::ResourceType;
use headless_chrome::protocol::cdp::types::Event;
use headless_chrome::{Browser, Tab};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};

const RESPONSE_HANDLER: &str = "surveyor-responses";

/// In-page resolver shared by every element operation. Mirrors the static
/// driver's locator rules.
const LOCATE_JS: &str = r#"
const __norm = (s) => (s || '').replace(/\s+/g, ' ').trim();
const __has = (h, n) => __norm(h).toLowerCase().includes(__norm(n).toLowerCase());
const __visible = (el) => !!el && !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length)
    && getComputedStyle(el).visibility !== 'hidden';
const __labelOf = (el) => {
    const out = [];
    if (el.getAttribute('aria-label')) out.push(el.getAttribute('aria-label'));
    if (el.id) { const l = document.querySelector(`label[for="${CSS.escape(el.id)}"]`); if (l) out.push(l.textContent); }
    const wrap = el.closest('label'); if (wrap) out.push(wrap.textContent);
    return out;
};
const __name = (el) => __norm(el.getAttribute('aria-label')) || __norm(el.textContent) || __norm(el.value) || __norm(el.title);
function __locate(loc) {
    const all = (sel) => Array.from(document.querySelectorAll(sel));
    const controls = () => all('input, textarea, select');
    switch (loc.kind) {
        case 'css': try { return all(loc.value); } catch (e) { return []; }
        case 'role': {
            const sel = loc.value.role === 'link' ? 'a[href], [role="link"]'
                : 'button, input[type="submit"], input[type="button"], input[type="reset"], [role="button"]';
            return all(sel).filter(el => __has(__name(el), loc.value.name));
        }
        case 'text': return all('body *').filter(el => __has(el.textContent, loc.value)
            && !Array.from(el.children).some(c => __has(c.textContent, loc.value)));
        case 'placeholder': return controls().filter(el => __norm(el.placeholder).toLowerCase() === __norm(loc.value).toLowerCase());
        case 'placeholder_contains': return controls().filter(el => el.placeholder && __has(el.placeholder, loc.value));
        case 'label': return controls().filter(el => __labelOf(el).some(l => __has(l, loc.value)));
        case 'name': return all('input, textarea').filter(el => (el.name || '').toLowerCase() === loc.value.toLowerCase());
        case 'input_type': return all('input').filter(el => el.type === loc.value.toLowerCase());
        case 'any_visible_input': return all('input, textarea').filter(el =>
            (el.tagName === 'TEXTAREA' || ['text','email','password','tel','number','search','url'].includes(el.type)) && __visible(el));
    }
    return [];
}
"#;

/// Launches a headless Chromium per page.
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    pub headless: bool,
}

impl ChromeLauncher {
    pub fn new() -> Self {
        Self { headless: true }
    }
}

impl Default for ChromeLauncher {
    fn default() -> Self {
        Self::new()
    }
}

fn browser_err(context: &str, e: impl std::fmt::Display) -> ScanError {
    ScanError::Browser(format!("{}: {}", context, e))
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserPage>> {
        let headless = self.headless;
        let options = options.clone();
        let page = tokio::task::spawn_blocking(move || ChromePage::launch_blocking(headless, &options))
            .await??;
        Ok(Box::new(page))
    }
}

#[derive(Default)]
struct NetworkState {
    subscribers: Vec<UnboundedSender<NetworkResponse>>,
    methods: HashMap<String, String>,
    last_document_status: Option<u16>,
}

pub struct ChromePage {
    _browser: Browser,
    tab: Arc<Tab>,
    network: Arc<Mutex<NetworkState>>,
    headers: Mutex<HashMap<String, String>>,
    cookies: Mutex<Vec<Cookie>>,
}

fn lock(state: &Mutex<NetworkState>) -> std::sync::MutexGuard<'_, NetworkState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ChromePage {
    fn launch_blocking(headless: bool, options: &LaunchOptions) -> Result<Self> {
        info!("Launching Chromium (headless: {})", headless);
        let user_agent = format!("--user-agent={}", options.user_agent);
        let mut args = vec![OsStr::new(&user_agent)];
        if options.ignore_https_errors {
            args.push(OsStr::new("--ignore-certificate-errors"));
        }

        let launch_options = headless_chrome::LaunchOptions::default_builder()
            .headless(headless)
            .window_size(Some(options.viewport))
            .args(args)
            .build()
            .map_err(|e| browser_err("invalid launch options", e))?;
        let browser = Browser::new(launch_options).map_err(|e| browser_err("launch failed", e))?;
        let tab = browser.new_tab().map_err(|e| browser_err("new tab", e))?;
        tab.set_default_timeout(options.navigation_timeout);

        let network = Arc::new(Mutex::new(NetworkState::default()));

        let methods = network.clone();
        tab.add_event_listener(Arc::new(move |event: &Event| {
            if let Event::NetworkRequestWillBeSent(sent) = event {
                lock(&methods).methods.insert(
                    sent.params.request_id.clone(),
                    sent.params.request.method.clone(),
                );
            }
        }))
        .map_err(|e| browser_err("event listener", e))?;

        let responses = network.clone();
        tab.register_response_handling(
            RESPONSE_HANDLER,
            Box::new(move |params, _fetch_body| {
                let resource = match params.Type {
                    ResourceType::Xhr => ResourceKind::Xhr,
                    ResourceType::Fetch => ResourceKind::Fetch,
                    ResourceType::Document => ResourceKind::Document,
                    _ => ResourceKind::Other,
                };
                let mut state = lock(&responses);
                let method = state
                    .methods
                    .remove(&params.request_id)
                    .unwrap_or_else(|| "GET".to_string());
                let status = params.response.status as u16;
                if resource == ResourceKind::Document {
                    state.last_document_status = Some(status);
                }
                let observed = NetworkResponse {
                    method,
                    url: params.response.url.clone(),
                    status,
                    resource,
                    content_type: Some(params.response.mime_type.clone()),
                };
                state.subscribers.retain(|tx| tx.send(observed.clone()).is_ok());
            }),
        )
        .map_err(|e| browser_err("response handling", e))?;

        Ok(Self {
            _browser: browser,
            tab,
            network,
            headers: Mutex::new(HashMap::new()),
            cookies: Mutex::new(Vec::new()),
        })
    }

    /// Run `f` against the tab on the blocking pool.
    async fn with_tab<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> Result<T> + Send + 'static,
    {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || f(&tab)).await?
    }

    async fn eval(&self, script: String) -> Result<Value> {
        self.with_tab(move |tab| {
            let result = tab
                .evaluate(&script, true)
                .map_err(|e| browser_err("script evaluation", e))?;
            Ok(result.value.unwrap_or(Value::Null))
        })
        .await
    }

    /// Evaluate `body` with `el` bound to the first match of `locator`.
    async fn on_element(&self, locator: &Locator, body: &str) -> Result<Value> {
        let loc = serde_json::to_string(locator)
            .map_err(|e| ScanError::Other(format!("locator encoding: {}", e)))?;
        let script = format!(
            "(() => {{ {LOCATE_JS}\nconst el = __locate({loc})[0];\nif (!el) return '__missing__';\n{body} }})()"
        );
        let value = self.eval(script).await?;
        if value.as_str() == Some("__missing__") {
            return Err(ScanError::ElementNotFound(locator.to_string()));
        }
        Ok(value)
    }

    async fn push_headers(&self) -> Result<()> {
        let mut merged = self
            .headers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        let cookies = self.cookies.lock().unwrap_or_else(|p| p.into_inner()).clone();
        if !cookies.is_empty() {
            let header = cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; ");
            merged.insert("Cookie".to_string(), header);
        }
        self.with_tab(move |tab| {
            let headers: HashMap<&str, &str> =
                merged.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            tab.set_extra_http_headers(headers)
                .map_err(|e| browser_err("extra headers", e))?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl BrowserPage for ChromePage {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<Navigation> {
        lock(&self.network).last_document_status = None;
        let target = url.to_string();
        let final_url = self
            .with_tab(move |tab| {
                tab.set_default_timeout(timeout);
                tab.navigate_to(&target)
                    .map_err(|e| browser_err("navigation", e))?;
                tab.wait_until_navigated().map_err(|_| {
                    ScanError::Timeout(timeout.as_millis() as u64, format!("navigating to {}", target))
                })?;
                Ok(tab.get_url())
            })
            .await?;
        let status = lock(&self.network).last_document_status.unwrap_or(200);
        Ok(Navigation {
            status,
            url: final_url,
        })
    }

    async fn current_url(&self) -> Result<String> {
        self.with_tab(|tab| Ok(tab.get_url())).await
    }

    async fn title(&self) -> Result<String> {
        self.with_tab(|tab| tab.get_title().map_err(|e| browser_err("title", e)))
            .await
    }

    async fn content(&self) -> Result<String> {
        self.with_tab(|tab| tab.get_content().map_err(|e| browser_err("content", e)))
            .await
    }

    async fn is_visible(&self, locator: &Locator) -> Result<bool> {
        match self.on_element(locator, "return __visible(el);").await {
            Ok(value) => Ok(value.as_bool().unwrap_or(false)),
            Err(ScanError::ElementNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn click(&self, locator: &Locator) -> Result<()> {
        self.on_element(
            locator,
            "if (!__visible(el)) return '__missing__'; el.scrollIntoView(); el.click(); return true;",
        )
        .await?;
        Ok(())
    }

    async fn fill(&self, locator: &Locator, value: &str) -> Result<()> {
        let value = json!(value).to_string();
        self.on_element(
            locator,
            &format!(
                "el.focus(); el.value = {value}; \
                 el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
                 el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true;"
            ),
        )
        .await?;
        Ok(())
    }

    async fn select_option(&self, locator: &Locator, label: &str) -> Result<()> {
        let label = json!(label).to_string();
        let selected = self
            .on_element(
                locator,
                &format!(
                    "const opt = Array.from(el.options || []).find(o => __norm(o.textContent) === __norm({label}) || o.value === {label}); \
                     if (!opt) return false; el.value = opt.value; \
                     el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true;"
                ),
            )
            .await?;
        if selected.as_bool() == Some(true) {
            Ok(())
        } else {
            Err(ScanError::ElementNotFound(format!("option {} in {}", label, locator)))
        }
    }

    async fn press_enter(&self) -> Result<()> {
        self.with_tab(|tab| {
            tab.press_key("Enter")
                .map_err(|e| browser_err("key press", e))?;
            Ok(())
        })
        .await
    }

    async fn wait_for_idle(&self, timeout: Duration) -> Result<()> {
        let script = "new Promise(r => { if (document.readyState === 'complete') r(true); \
                      else addEventListener('load', () => r(true)); })";
        tokio::time::timeout(timeout, self.eval(script.to_string()))
            .await
            .map_err(|_| ScanError::Timeout(timeout.as_millis() as u64, "network idle".to_string()))??;
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(())
    }

    async fn set_extra_headers(&self, headers: HashMap<String, String>) -> Result<()> {
        self.headers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend(headers);
        self.push_headers().await
    }

    async fn add_cookie(&self, cookie: Cookie) -> Result<()> {
        debug!("Adding cookie {} for {}", cookie.name, cookie.domain);
        self.cookies
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(cookie);
        self.push_headers().await
    }

    fn subscribe_responses(&self) -> UnboundedReceiver<NetworkResponse> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.network).subscribers.push(tx);
        rx
    }

    async fn request(&self, request: ApiRequest) -> Result<ApiResponse> {
        let init = json!({
            "method": request.method.as_str(),
            "headers": if request.json.is_some() {
                let mut h = request.headers.clone();
                h.insert("Content-Type".to_string(), "application/json".to_string());
                h
            } else {
                request.headers.clone()
            },
            "body": request.json.as_ref().map(|b| b.to_string()),
            "credentials": "include",
        });
        let script = format!(
            "fetch({url}, {init}).then(async r => JSON.stringify({{ status: r.status, \
             type: r.headers.get('content-type'), body: await r.text() }}))",
            url = json!(request.url),
            init = init,
        );
        let raw = tokio::time::timeout(request.timeout, self.eval(script))
            .await
            .map_err(|_| ScanError::Timeout(request.timeout.as_millis() as u64, request.url.clone()))??;
        let parsed: Value = raw
            .as_str()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| ScanError::ParseError(format!("fetch result: {}", e)))?
            .ok_or_else(|| ScanError::Browser(format!("fetch {} returned nothing", request.url)))?;

        Ok(ApiResponse {
            status: parsed["status"].as_u64().unwrap_or(0) as u16,
            content_type: parsed["type"].as_str().map(str::to_string),
            body: parsed["body"].as_str().unwrap_or_default().to_string(),
        })
    }

    async fn close(&self) -> Result<()> {
        let _ = self.tab.deregister_response_handling(RESPONSE_HANDLER);
        lock(&self.network).subscribers.clear();
        self.with_tab(|tab| {
            tab.close(false).map_err(|e| browser_err("close", e))?;
            Ok(())
        })
        .await
    }
}
