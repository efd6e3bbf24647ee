//! Heuristic login-page detection: five DOM signals scored against a
//! threshold.

use crate::browser::BrowserPage;
use crate::dom::selector;
use regex::Regex;
use scraper::Html;
use std::sync::LazyLock;
use tracing::debug;

static LOGIN_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)log\s?in|sign\s?in|authenticate").expect("valid regex"));
static LOGIN_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)login|signin|auth").expect("valid regex"));
static LOGIN_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)login|sign in|log in").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthSignal {
    PasswordField,
    IdentityField,
    LoginText,
    LoginUrl,
    LoginTitle,
}

/// Signal weights and the score at which a page counts as an auth page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthWeights {
    pub weights: Vec<(AuthSignal, u32)>,
    pub threshold: u32,
}

impl Default for AuthWeights {
    fn default() -> Self {
        Self {
            weights: vec![
                (AuthSignal::PasswordField, 3),
                (AuthSignal::IdentityField, 2),
                (AuthSignal::LoginText, 1),
                (AuthSignal::LoginUrl, 1),
                (AuthSignal::LoginTitle, 1),
            ],
            threshold: 4,
        }
    }
}

/// Which signals a page shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthSignals {
    pub password_field: bool,
    pub identity_field: bool,
    pub login_text: bool,
    pub login_url: bool,
    pub login_title: bool,
}

impl AuthSignals {
    pub fn collect(html: &str, url: &str, title: &str) -> Self {
        let doc = Html::parse_document(html);
        let body = doc
            .select(&selector("body"))
            .next()
            .map(|b| b.inner_html())
            .unwrap_or_default();

        Self {
            password_field: doc
                .select(&selector("input[type=\"password\"]"))
                .next()
                .is_some(),
            identity_field: doc
                .select(&selector(
                    "input[name*=\"user\"], input[name*=\"email\"], input[id*=\"user\"], \
                     input[id*=\"email\"], input[type=\"email\"]",
                ))
                .next()
                .is_some(),
            login_text: LOGIN_TEXT.is_match(&body),
            login_url: LOGIN_URL.is_match(url),
            login_title: LOGIN_TITLE.is_match(title),
        }
    }

    pub fn has(&self, signal: AuthSignal) -> bool {
        match signal {
            AuthSignal::PasswordField => self.password_field,
            AuthSignal::IdentityField => self.identity_field,
            AuthSignal::LoginText => self.login_text,
            AuthSignal::LoginUrl => self.login_url,
            AuthSignal::LoginTitle => self.login_title,
        }
    }

    pub fn score(&self, weights: &AuthWeights) -> u32 {
        weights
            .weights
            .iter()
            .filter(|(signal, _)| self.has(*signal))
            .map(|(_, weight)| weight)
            .sum()
    }
}

pub fn is_auth_page(html: &str, url: &str, title: &str) -> bool {
    let weights = AuthWeights::default();
    AuthSignals::collect(html, url, title).score(&weights) >= weights.threshold
}

/// Classify the page currently loaded. Unreadable pages are not auth pages.
pub async fn detect_auth_page(page: &dyn BrowserPage) -> bool {
    let (html, url, title) = match (page.content().await, page.current_url().await) {
        (Ok(html), Ok(url)) => (html, url, page.title().await.unwrap_or_default()),
        _ => {
            debug!("Auth detection skipped, page unreadable");
            return false;
        }
    };
    is_auth_page(&html, &url, &title)
}
