use crate::extractor::UiSnapshot;
use serde::{Deserialize, Serialize};

/// One page visited by the crawler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    /// Canonical URL.
    pub url: String,
    pub title: String,
    /// HTTP status of the navigation, `0` when navigation failed.
    pub status_code: u16,
    pub response_time_ms: u64,
    pub has_forms: bool,
    pub is_auth_page: bool,
    pub ui_elements: UiSnapshot,
    pub error: Option<String>,
}

impl PageResult {
    pub fn new(url: String) -> Self {
        Self {
            url,
            ..Default::default()
        }
    }

    pub fn with_error(url: String, error: String) -> Self {
        Self {
            url,
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}
