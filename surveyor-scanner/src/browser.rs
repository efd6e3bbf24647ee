//! Browser automation contract.
//!
//! Discovery and the in-process plan executor only ever talk to a page
//! through [`BrowserPage`], so any engine that can navigate, read the DOM,
//! interact with elements, inject headers/cookies and report network
//! responses can drive a scan.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Outcome of a top-level navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
}

/// Accessible roles the locator vocabulary understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Link,
    Button,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Link => "link",
            Role::Button => "button",
        }
    }
}

/// Ways of pointing at an element. Every driver resolves these the same way
/// the generated Playwright code does, so a plan behaves alike in both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Locator {
    /// Raw CSS selector.
    Css(String),
    /// Element with an accessible role whose name contains `name` (case-insensitive).
    Role { role: Role, name: String },
    /// Any element whose visible text contains the string.
    Text(String),
    /// Form control whose placeholder equals the string.
    Placeholder(String),
    /// Form control whose placeholder contains the string (case-insensitive).
    PlaceholderContains(String),
    /// Form control labelled by `aria-label` or `<label for>`.
    Label(String),
    /// `input`/`textarea` whose `name` attribute matches (case-insensitive).
    Name(String),
    /// `input` of the given `type`.
    InputType(String),
    /// First visible text-entry input.
    AnyVisibleInput,
}

impl Locator {
    pub fn role(role: Role, name: impl Into<String>) -> Self {
        Locator::Role {
            role,
            name: name.into(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(s) => write!(f, "css={}", s),
            Locator::Role { role, name } => write!(f, "role={}[name=\"{}\"]", role.as_str(), name),
            Locator::Text(s) => write!(f, "text={}", s),
            Locator::Placeholder(s) => write!(f, "placeholder={}", s),
            Locator::PlaceholderContains(s) => write!(f, "placeholder*={}", s),
            Locator::Label(s) => write!(f, "label={}", s),
            Locator::Name(s) => write!(f, "name={}", s),
            Locator::InputType(s) => write!(f, "input[type={}]", s),
            Locator::AnyVisibleInput => write!(f, "input:visible"),
        }
    }
}

/// Resource type reported with an observed network response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Document,
    Xhr,
    Fetch,
    Other,
}

/// A response observed by the page while it was browsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkResponse {
    pub method: String,
    pub url: String,
    pub status: u16,
    pub resource: ResourceKind,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// A request issued from the browsing context, sharing its headers and cookies.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub url: String,
    pub json: Option<serde_json::Value>,
    pub headers: HashMap<String, String>,
    pub timeout: Duration,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            json: None,
            headers: HashMap::new(),
            timeout: Duration::from_secs(15),
        }
    }

    pub fn post_json(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            json: Some(body),
            headers: HashMap::new(),
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl ApiResponse {
    pub fn json(&self) -> Result<serde_json::Value> {
        serde_json::from_str(&self.body)
            .map_err(|e| crate::error::ScanError::ParseError(format!("response is not JSON: {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
}

/// Launch options shared by every driver.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub user_agent: String,
    pub navigation_timeout: Duration,
    pub ignore_https_errors: bool,
    pub viewport: (u32, u32),
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            user_agent: format!("Surveyor/{} Discovery Scanner", env!("CARGO_PKG_VERSION")),
            navigation_timeout: Duration::from_secs(15),
            ignore_https_errors: true,
            viewport: (1280, 800),
        }
    }
}

/// One tab of an automated browser.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<Navigation>;

    async fn current_url(&self) -> Result<String>;

    async fn title(&self) -> Result<String>;

    /// Serialized DOM of the current document.
    async fn content(&self) -> Result<String>;

    async fn is_visible(&self, locator: &Locator) -> Result<bool>;

    async fn count(&self, locator: &Locator) -> Result<usize> {
        let html = self.content().await?;
        Ok(crate::dom::count_matches(&html, locator))
    }

    /// Text of the body, without markup.
    async fn body_text(&self) -> Result<String> {
        let html = self.content().await?;
        Ok(crate::dom::body_text(&html))
    }

    async fn click(&self, locator: &Locator) -> Result<()>;

    async fn fill(&self, locator: &Locator, value: &str) -> Result<()>;

    /// Select an `<option>` by its visible label.
    async fn select_option(&self, locator: &Locator, label: &str) -> Result<()>;

    async fn press_enter(&self) -> Result<()>;

    /// Wait until the network has been quiet for a moment.
    async fn wait_for_idle(&self, timeout: Duration) -> Result<()>;

    async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Headers sent with every subsequent request from this context.
    async fn set_extra_headers(&self, headers: HashMap<String, String>) -> Result<()>;

    async fn add_cookie(&self, cookie: Cookie) -> Result<()>;

    /// Start observing responses. Dropping the receiver ends the subscription.
    fn subscribe_responses(&self) -> UnboundedReceiver<NetworkResponse>;

    async fn request(&self, request: ApiRequest) -> Result<ApiResponse>;

    async fn close(&self) -> Result<()>;
}

/// Produces fresh pages, one per scan.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserPage>>;
}
