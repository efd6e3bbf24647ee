//! Establishes an authenticated browsing context before discovery, and
//! derives the headers generated API tests should send.

use crate::error::{CoreError, Result};
use crate::model::{AuthConfig, AuthStrategy};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use surveyor_scanner::browser::{ApiRequest, Cookie};
use surveyor_scanner::{BrowserPage, Locator};
use tracing::{debug, info, warn};
use url::Url;

const LOGIN_TIMEOUT: Duration = Duration::from_secs(15);

pub fn basic_credentials(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", username, password)))
}

/// Absolute URLs pass through, anything else is appended to the base.
fn resolve_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else {
        format!("{}{}", base_url.trim_end_matches('/'), path)
    }
}

/// Follow a dotted path such as `data.session.token`.
fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, key| current.get(key))
}

fn token_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub async fn authenticate(
    page: &dyn BrowserPage,
    base_url: &str,
    strategy: AuthStrategy,
    config: &AuthConfig,
) -> Result<()> {
    match strategy {
        AuthStrategy::None => Ok(()),
        AuthStrategy::Form => form_login(page, base_url, config).await,
        AuthStrategy::Basic => {
            let username = config
                .username
                .as_deref()
                .ok_or_else(|| CoreError::Config("basic auth needs a username".into()))?;
            let password = config.password.as_deref().unwrap_or_default();
            page.set_extra_headers(HashMap::from([(
                "Authorization".to_string(),
                basic_credentials(username, password),
            )]))
            .await?;
            info!("Using basic auth as {}", username);
            Ok(())
        }
        AuthStrategy::Bearer => {
            let Some(token) = bearer_token(page, base_url, config).await? else {
                warn!("Bearer auth configured without a token or login API, continuing anonymously");
                return Ok(());
            };
            page.set_extra_headers(HashMap::from([(
                "Authorization".to_string(),
                format!("Bearer {}", token),
            )]))
            .await?;
            info!("Using bearer token");
            Ok(())
        }
        AuthStrategy::Cookie => {
            let (Some(name), Some(value)) = (&config.cookie_name, &config.cookie_value) else {
                warn!("Cookie auth configured without cookie_name/cookie_value, continuing anonymously");
                return Ok(());
            };
            let url = Url::parse(base_url)
                .map_err(|e| CoreError::Config(format!("invalid base URL {}: {}", base_url, e)))?;
            let domain = url.host_str().unwrap_or_default().to_string();
            page.add_cookie(Cookie {
                name: name.clone(),
                value: value.clone(),
                domain,
                path: "/".to_string(),
            })
            .await?;
            info!("Injected cookie {}", name);
            Ok(())
        }
    }
}

async fn form_login(page: &dyn BrowserPage, base_url: &str, config: &AuthConfig) -> Result<()> {
    let login_url = resolve_url(base_url, config.login_url.as_deref().unwrap_or("/login"));
    info!("Logging in through {}", login_url);
    page.goto(&login_url, LOGIN_TIMEOUT).await?;

    if let (Some(selector), Some(username)) = (&config.username_selector, &config.username) {
        page.fill(&Locator::Css(selector.clone()), username).await?;
    }
    if let (Some(selector), Some(password)) = (&config.password_selector, &config.password) {
        page.fill(&Locator::Css(selector.clone()), password).await?;
    }
    match &config.submit_selector {
        Some(selector) => page.click(&Locator::Css(selector.clone())).await?,
        None => page.press_enter().await?,
    }
    if let Err(e) = page.wait_for_idle(LOGIN_TIMEOUT).await {
        debug!("Page did not settle after login: {}", e);
    }
    Ok(())
}

/// The configured token, or one fetched from the login API. `None` when
/// neither is configured.
async fn bearer_token(
    page: &dyn BrowserPage,
    base_url: &str,
    config: &AuthConfig,
) -> Result<Option<String>> {
    if let Some(token) = config.token.as_ref().filter(|t| !t.is_empty()) {
        return Ok(Some(token.clone()));
    }
    let (Some(login_api), Some(username), Some(password)) =
        (&config.login_api, &config.username, &config.password)
    else {
        return Ok(None);
    };

    let url = resolve_url(base_url, login_api);
    let response = page
        .request(
            ApiRequest::post_json(
                &url,
                json!({ "email": username, "username": username, "password": password }),
            )
            .with_timeout(LOGIN_TIMEOUT),
        )
        .await?;
    let body = response
        .json()
        .map_err(|e| CoreError::Auth(format!("login API {} answered {}: {}", url, response.status, e)))?;

    let path = config.token_path.as_deref().unwrap_or("token");
    lookup_path(&body, path)
        .and_then(token_string)
        .map(Some)
        .ok_or_else(|| CoreError::Auth(format!("no token at '{}' in login response", path)))
}

/// Headers generated API tests send. Only static credentials qualify.
pub fn auth_headers(strategy: AuthStrategy, config: &AuthConfig) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    match strategy {
        AuthStrategy::Basic => {
            if let Some(username) = &config.username {
                headers.insert(
                    "Authorization".to_string(),
                    basic_credentials(username, config.password.as_deref().unwrap_or_default()),
                );
            }
        }
        AuthStrategy::Bearer => {
            if let Some(token) = config.token.as_ref().filter(|t| !t.is_empty()) {
                headers.insert("Authorization".to_string(), format!("Bearer {}", token));
            }
        }
        _ => {}
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use surveyor_scanner::browser::LaunchOptions;
    use surveyor_scanner::StaticPage;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_basic_credentials() {
        assert_eq!(basic_credentials("user", "pass"), "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn test_lookup_path() {
        let body = json!({"data": {"session": {"token": "abc"}}, "token": 42});
        assert_eq!(
            lookup_path(&body, "data.session.token").and_then(token_string),
            Some("abc".to_string())
        );
        assert_eq!(lookup_path(&body, "token").and_then(token_string), Some("42".to_string()));
        assert!(lookup_path(&body, "data.missing").is_none());
    }

    #[test]
    fn test_auth_headers_only_for_static_credentials() {
        let config = AuthConfig {
            username: Some("user".into()),
            password: Some("pass".into()),
            ..Default::default()
        };
        let headers = auth_headers(AuthStrategy::Basic, &config);
        assert_eq!(headers["Authorization"], "Basic dXNlcjpwYXNz");

        let bearer = AuthConfig {
            login_api: Some("/api/login".into()),
            ..Default::default()
        };
        assert!(auth_headers(AuthStrategy::Bearer, &bearer).is_empty());
        assert!(auth_headers(AuthStrategy::Form, &config).is_empty());
    }

    #[tokio::test]
    async fn test_basic_without_username_is_config_error() {
        let page = StaticPage::new(&LaunchOptions::default()).unwrap();
        let err = authenticate(&page, "http://127.0.0.1:1", AuthStrategy::Basic, &AuthConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[tokio::test]
    async fn test_bearer_login_sets_header_for_later_requests() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/login"))
            .and(body_string_contains("\"password\":\"pw\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"jwt": "t0k"}})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(header("authorization", "Bearer t0k"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>in</p>"))
            .mount(&server)
            .await;

        let config = AuthConfig {
            login_api: Some("/api/login".into()),
            username: Some("me@example.com".into()),
            password: Some("pw".into()),
            token_path: Some("data.jwt".into()),
            ..Default::default()
        };
        let page = StaticPage::new(&LaunchOptions::default()).unwrap();
        authenticate(&page, &server.uri(), AuthStrategy::Bearer, &config)
            .await
            .unwrap();
        let nav = page.goto(&server.uri(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(nav.status, 200);
    }

    #[tokio::test]
    async fn test_bearer_login_without_token_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/login"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "nope"})))
            .mount(&server)
            .await;

        let config = AuthConfig {
            login_api: Some("/api/login".into()),
            username: Some("me".into()),
            password: Some("bad".into()),
            ..Default::default()
        };
        let page = StaticPage::new(&LaunchOptions::default()).unwrap();
        let err = authenticate(&page, &server.uri(), AuthStrategy::Bearer, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Auth(_)));
    }

    #[tokio::test]
    async fn test_form_login_submits_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/signin"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<form method="post" action="/session">
                    <input id="user" name="user"><input id="pass" name="pass" type="password">
                    <button type="submit">Go</button></form>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .and(body_string_contains("user=alice"))
            .and(body_string_contains("pass=secret"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Dashboard</h1>"))
            .expect(1)
            .mount(&server)
            .await;

        let config = AuthConfig {
            login_url: Some("/signin".into()),
            username: Some("alice".into()),
            password: Some("secret".into()),
            username_selector: Some("#user".into()),
            password_selector: Some("#pass".into()),
            ..Default::default()
        };
        let page = StaticPage::new(&LaunchOptions::default()).unwrap();
        authenticate(&page, &server.uri(), AuthStrategy::Form, &config)
            .await
            .unwrap();
        assert!(page.current_url().await.unwrap().ends_with("/session"));
    }
}
