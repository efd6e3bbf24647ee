//! Passive capture of the API traffic a page generates while it is browsed,
//! and an active probe of well-known API paths.

use crate::browser::{ApiRequest, BrowserPage, NetworkResponse, ResourceKind};
use crate::normalize::same_origin;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;
use url::Url;

/// Paths tried by [`probe_common_apis`].
pub const COMMON_API_PATHS: &[&str] = &[
    "/api",
    "/api/v1",
    "/api/v2",
    "/graphql",
    "/api/health",
    "/api/status",
    "/api/users",
    "/api/auth",
];

/// An API endpoint observed or probed during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedApi {
    pub method: String,
    pub url: String,
    pub status: u16,
    /// Primary content-type token, e.g. `application/json`.
    pub content_type: Option<String>,
}

/// `text/html; charset=utf-8` → `text/html`.
pub fn primary_content_type(value: &str) -> Option<String> {
    let token = value.split(';').next().unwrap_or_default().trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// A recording session over a page's network responses. Everything observed
/// between [`ApiRecorder::start`] and [`ApiRecorder::stop`] is considered.
pub struct ApiRecorder {
    base: Url,
    responses: UnboundedReceiver<NetworkResponse>,
}

impl ApiRecorder {
    pub fn start(page: &dyn BrowserPage, base: Url) -> Self {
        debug!("Recording API traffic for {}", base);
        Self {
            base,
            responses: page.subscribe_responses(),
        }
    }

    /// End the session and return the captured APIs: same-origin XHR/fetch
    /// responses only, deduplicated by method and URL with the first
    /// occurrence kept.
    pub fn stop(mut self) -> Vec<CapturedApi> {
        self.responses.close();
        let mut observed = Vec::new();
        while let Ok(response) = self.responses.try_recv() {
            observed.push(response);
        }
        let captured = filter_api_responses(observed, &self.base);
        debug!("Recorder stopped with {} APIs", captured.len());
        captured
    }
}

fn filter_api_responses(
    responses: impl IntoIterator<Item = NetworkResponse>,
    base: &Url,
) -> Vec<CapturedApi> {
    let mut seen = HashSet::new();
    responses
        .into_iter()
        .filter(|r| matches!(r.resource, ResourceKind::Xhr | ResourceKind::Fetch))
        .filter(|r| same_origin(&r.url, base))
        .filter(|r| seen.insert(format!("{}:{}", r.method, r.url)))
        .map(|r| CapturedApi {
            method: r.method,
            url: r.url,
            status: r.status,
            content_type: r.content_type.as_deref().and_then(primary_content_type),
        })
        .collect()
}

/// GET each of [`COMMON_API_PATHS`] from the page's context. Anything that
/// answers below 500 is reported; timeouts and connection errors are not.
pub async fn probe_common_apis(
    page: &dyn BrowserPage,
    base: &Url,
    timeout: Duration,
) -> Vec<CapturedApi> {
    let mut found = Vec::new();
    for path in COMMON_API_PATHS {
        let Ok(url) = base.join(path) else {
            continue;
        };
        let url = url.to_string();
        match page.request(ApiRequest::get(&url).with_timeout(timeout)).await {
            Ok(response) if response.status < 500 => {
                debug!("Probe {} answered {}", url, response.status);
                found.push(CapturedApi {
                    method: "GET".to_string(),
                    url,
                    status: response.status,
                    content_type: response
                        .content_type
                        .as_deref()
                        .and_then(primary_content_type),
                });
            }
            Ok(response) => debug!("Probe {} answered {}, ignored", url, response.status),
            Err(e) => debug!("Probe {} failed: {}", url, e),
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::LaunchOptions;
    use crate::static_driver::StaticPage;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    fn response(method: &str, url: &str, status: u16, kind: ResourceKind) -> NetworkResponse {
        NetworkResponse {
            method: method.to_string(),
            url: url.to_string(),
            status,
            resource: kind,
            content_type: Some("application/json; charset=utf-8".to_string()),
        }
    }

    #[test]
    fn test_primary_content_type() {
        assert_eq!(
            primary_content_type("application/json; charset=utf-8"),
            Some("application/json".to_string())
        );
        assert_eq!(primary_content_type(""), None);
    }

    #[test]
    fn test_filter_keeps_same_origin_xhr_and_fetch_only() {
        let base = Url::parse("http://app.test/").unwrap();
        let captured = filter_api_responses(
            vec![
                response("GET", "http://app.test/api/items", 200, ResourceKind::Xhr),
                response("GET", "http://app.test/", 200, ResourceKind::Document),
                response("POST", "http://app.test/api/items", 201, ResourceKind::Fetch),
                response("GET", "http://cdn.test/api/x", 200, ResourceKind::Fetch),
                response("GET", "http://app.test/api/items", 401, ResourceKind::Fetch),
                response("GET", "http://app.test/logo.png", 200, ResourceKind::Other),
            ],
            &base,
        );
        assert_eq!(captured.len(), 2);
        assert_eq!(captured[0].method, "GET");
        assert_eq!(captured[0].status, 200);
        assert_eq!(captured[0].content_type.as_deref(), Some("application/json"));
        assert_eq!(captured[1].method, "POST");
    }

    #[tokio::test]
    async fn test_recorder_drains_until_stop() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>hi</p>"))
            .mount(&server)
            .await;

        let page = StaticPage::new(&LaunchOptions::default()).unwrap();
        let recorder = ApiRecorder::start(&page, Url::parse(&server.uri()).unwrap());
        page.goto(&server.uri(), Duration::from_secs(5)).await.unwrap();
        // Documents are observed but are not API traffic.
        assert!(recorder.stop().is_empty());
    }

    #[tokio::test]
    async fn test_probe_reports_below_500_only() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_string("{}"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/users"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let page = StaticPage::new(&LaunchOptions::default()).unwrap();
        let base = Url::parse(&server.uri()).unwrap();
        let found = probe_common_apis(&page, &base, Duration::from_secs(5)).await;

        let health = found.iter().find(|a| a.url.ends_with("/api/health")).unwrap();
        assert_eq!(health.status, 200);
        assert_eq!(health.content_type.as_deref(), Some("application/json"));
        assert!(found.iter().any(|a| a.url.ends_with("/api/users") && a.status == 401));
        assert!(!found.iter().any(|a| a.url.ends_with("/graphql")));
        // Unmatched paths answer 404, which is still a finding.
        assert_eq!(found.len(), 7);
    }

    #[tokio::test]
    async fn test_probe_swallows_connection_errors() {
        let page = StaticPage::new(&LaunchOptions::default()).unwrap();
        let base = Url::parse("http://127.0.0.1:1/").unwrap();
        let found = probe_common_apis(&page, &base, Duration::from_millis(500)).await;
        assert!(found.is_empty());
    }
}
