//! Deduplication of raw discovery output. Every pass keeps the first
//! occurrence of a key and preserves input order.

use crate::model::DiscoveredApi;
use std::collections::HashSet;
use surveyor_scanner::forms::is_login_form;
use surveyor_scanner::{CapturedApi, DiscoveredForm, FormField, PageResult};

pub fn classify_pages(pages: Vec<PageResult>) -> Vec<PageResult> {
    let mut seen = HashSet::new();
    pages
        .into_iter()
        .filter(|p| seen.insert(p.url.clone()))
        .collect()
}

fn api_key(method: &str, url: &str) -> String {
    format!("{}:{}", method, url)
}

/// Deduplicate on method and URL. An endpoint requires auth when any of its
/// occurrences answered 401 or 403, even if the kept one did not.
pub fn classify_apis(apis: Vec<CapturedApi>) -> Vec<DiscoveredApi> {
    let guarded: HashSet<String> = apis
        .iter()
        .filter(|a| matches!(a.status, 401 | 403))
        .map(|a| api_key(&a.method, &a.url))
        .collect();

    let mut seen = HashSet::new();
    apis.into_iter()
        .filter(|a| seen.insert(api_key(&a.method, &a.url)))
        .map(|a| {
            let requires_auth = guarded.contains(&api_key(&a.method, &a.url));
            DiscoveredApi {
                method: a.method,
                url: a.url,
                status: a.status,
                content_type: a.content_type,
                requires_auth,
            }
        })
        .collect()
}

/// Deduplicate on page URL, action and method, recomputing the login flag
/// from the fields.
pub fn classify_forms(forms: Vec<DiscoveredForm>) -> Vec<DiscoveredForm> {
    let mut seen = HashSet::new();
    forms
        .into_iter()
        .filter(|f| seen.insert(format!("{}:{}:{}", f.page_url, f.action, f.method)))
        .map(|mut f| {
            f.is_login_form = is_login_form(&f.fields);
            f
        })
        .collect()
}

pub fn parse_form_fields(json: &str) -> Option<Vec<FormField>> {
    serde_json::from_str(json).ok()
}

/// Login detection over a serialized field list. Unparseable input is not a
/// login form.
pub fn login_form_from_json(json: &str) -> bool {
    parse_form_fields(json).is_some_and(|fields| is_login_form(&fields))
}
