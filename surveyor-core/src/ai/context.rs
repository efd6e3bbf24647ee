//! Bounded text description of what discovery found, for the model prompt.

use crate::model::{DiscoveredApi, StoredForm, StoredPage};
use std::collections::BTreeMap;
use surveyor_scanner::{ScoutedPage, UiSnapshot};

pub const MAX_PAGES: usize = 15;
pub const MAX_LINKS: usize = 15;
pub const MAX_APIS: usize = 20;
pub const MAX_FORMS: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct ContextPage {
    pub url: String,
    pub title: String,
    pub ui: UiSnapshot,
}

impl From<StoredPage> for ContextPage {
    fn from(page: StoredPage) -> Self {
        Self {
            url: page.url,
            title: page.title,
            ui: page.ui_elements,
        }
    }
}

impl From<ScoutedPage> for ContextPage {
    fn from(page: ScoutedPage) -> Self {
        Self {
            url: page.url,
            title: page.title,
            ui: page.ui_elements,
        }
    }
}

/// Everything the generator knows about a target.
#[derive(Debug, Clone, Default)]
pub struct AiContext {
    pub base_url: String,
    pub pages: Vec<ContextPage>,
    pub apis: Vec<DiscoveredApi>,
    pub forms: Vec<StoredForm>,
    pub auth_headers: BTreeMap<String, String>,
}

fn describe_page(page: &ContextPage) -> String {
    let ui = &page.ui;
    let mut entry = format!("PAGE: {} (title: \"{}\")", page.url, page.title);
    if !ui.headings.is_empty() {
        entry.push_str(&format!("\n  Headings: {}", ui.headings.join(" | ")));
    }
    if !ui.buttons.is_empty() {
        entry.push_str(&format!("\n  Buttons: {}", ui.buttons.join(" | ")));
    }
    if !ui.inputs.is_empty() {
        let inputs: Vec<String> = ui
            .inputs
            .iter()
            .map(|input| {
                let label = [&input.placeholder, &input.label, &input.name]
                    .into_iter()
                    .find(|s| !s.is_empty())
                    .map(String::as_str)
                    .unwrap_or_default();
                format!("\"{}\" [{}]", label, input.input_type)
            })
            .collect();
        entry.push_str(&format!("\n  Inputs: {}", inputs.join(", ")));
    }
    if !ui.links.is_empty() {
        let links: Vec<&str> = ui.links.iter().take(MAX_LINKS).map(String::as_str).collect();
        entry.push_str(&format!("\n  Links: {}", links.join(" | ")));
    }
    if !ui.selects.is_empty() {
        let selects: Vec<String> = ui
            .selects
            .iter()
            .map(|s| format!("\"{}\" ({})", s.label, s.options.join(", ")))
            .collect();
        entry.push_str(&format!("\n  Selects: {}", selects.join("; ")));
    }
    entry
}

pub fn summarize_pages(pages: &[ContextPage]) -> String {
    pages
        .iter()
        .take(MAX_PAGES)
        .map(describe_page)
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn summarize_apis(apis: &[DiscoveredApi]) -> String {
    apis.iter()
        .take(MAX_APIS)
        .map(|a| format!("{} {} ({})", a.method, a.url, a.status))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn summarize_forms(forms: &[StoredForm]) -> String {
    forms
        .iter()
        .take(MAX_FORMS)
        .map(|f| {
            let fields: Vec<String> = f
                .fields
                .iter()
                .map(|field| {
                    let name = if field.name.is_empty() { &field.id } else { &field.name };
                    format!("{} [{}]", name, field.field_type)
                })
                .collect();
            format!(
                "{} {} on {}: {}",
                f.method,
                f.action,
                f.page_url,
                fields.join(", ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn or_none(section: String) -> String {
    if section.is_empty() {
        "(none)".to_string()
    } else {
        section
    }
}

pub fn system_prompt(base_url: &str) -> String {
    format!(
        r#"You are a test planner. Given a web application and a user request, output a JSON array of test plans.

RULES:
- Output ONLY valid JSON, no markdown, no explanation, no backticks.
- Each test is an object with "name" (string) and "steps" (array).
- Each step is an object with an "action" and parameters.

AVAILABLE ACTIONS:
  {{"action": "goto", "path": "/login"}}
  {{"action": "click_link", "text": "Sign Up"}}
  {{"action": "click_button", "text": "Submit"}}
  {{"action": "fill", "field": "Email", "value": "test@example.com"}}
  {{"action": "select", "field": "Country", "value": "France"}}
  {{"action": "wait", "seconds": 2}}
  {{"action": "assert_url_contains", "text": "/dashboard"}}
  {{"action": "assert_url_changed"}}
  {{"action": "assert_url_not_changed"}}
  {{"action": "assert_visible", "text": "Welcome"}}
  {{"action": "assert_not_visible", "text": "Sign Up"}}
  {{"action": "assert_element_exists", "selector": ".error"}}
  {{"action": "assert_element_count", "selector": ".alert", "min": 1}}
  {{"action": "assert_page_has_text", "pattern": "confirm|success|welcome|created|thank|check your email"}}
  {{"action": "api_get", "path": "/api/users", "assert_status": 200}}
  {{"action": "api_post", "path": "/api/login", "body": {{"email": "x", "password": "y"}}, "assert_status": 401}}

FIELD MATCHING:
- The "field" value in "fill" and "select" will be matched against placeholder, label, aria-label, and name attributes. Use EXACT text from the page descriptions below.

IMPORTANT:
- ONLY use button text, link text, and field names that appear in the page descriptions below.
- Do NOT invent or guess element text that is not listed.
- Keep tests simple: 3-6 steps each.
- Generate 2-5 tests depending on scope.
- For login with wrong password: fill form, submit, wait 2 seconds, then assert_url_not_changed.
- For account creation: fill all visible fields, click submit, wait 3 seconds, then ONLY use assert_url_changed.
- Do NOT use assert_url_contains with specific paths like "/dashboard" or "/welcome" unless they appear below.
- Tests may run in parallel: create fresh test data instead of relying on existing accounts.
- Use realistic test data: test@example.com, John, Doe, Password123!, etc.

Base URL: {base_url}"#
    )
}

pub fn user_message(context: &AiContext, prompt: &str) -> String {
    format!(
        "DISCOVERED PAGES:\n{}\n\nAPI ENDPOINTS:\n{}\n\nFORMS:\n{}\n\nUSER REQUEST: {}\n\nOutput the JSON test plan array now.",
        or_none(summarize_pages(&context.pages)),
        or_none(summarize_apis(&context.apis)),
        or_none(summarize_forms(&context.forms)),
        prompt
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use surveyor_scanner::extractor::{InputDescriptor, SelectDescriptor};

    fn page(url: &str) -> ContextPage {
        ContextPage {
            url: url.into(),
            title: "Home".into(),
            ui: UiSnapshot::default(),
        }
    }

    #[test]
    fn test_page_description() {
        let mut home = page("http://a.test/");
        home.ui.headings = vec!["Welcome".into()];
        home.ui.buttons = vec!["Sign up".into(), "Log in".into()];
        home.ui.inputs = vec![InputDescriptor {
            input_type: "email".into(),
            placeholder: String::new(),
            label: "Email".into(),
            name: "email".into(),
        }];
        home.ui.selects = vec![SelectDescriptor {
            label: "Plan".into(),
            options: vec!["Free".into(), "Pro".into()],
        }];

        let text = summarize_pages(&[home]);
        assert!(text.starts_with("PAGE: http://a.test/ (title: \"Home\")"));
        assert!(text.contains("Buttons: Sign up | Log in"));
        assert!(text.contains("Inputs: \"Email\" [email]"));
        assert!(text.contains("Selects: \"Plan\" (Free, Pro)"));
        assert!(!text.contains("Links:"));
    }

    #[test]
    fn test_caps() {
        let pages: Vec<ContextPage> = (0..30).map(|i| page(&format!("http://a.test/{}", i))).collect();
        assert_eq!(summarize_pages(&pages).matches("PAGE:").count(), MAX_PAGES);

        let mut linked = page("http://a.test/");
        linked.ui.links = (0..40).map(|i| format!("link{}", i)).collect();
        let text = summarize_pages(&[linked]);
        assert!(text.contains("link14"));
        assert!(!text.contains("link15"));
    }

    #[test]
    fn test_empty_sections() {
        let message = user_message(&AiContext::default(), "test signup");
        assert!(message.contains("DISCOVERED PAGES:\n(none)"));
        assert!(message.contains("API ENDPOINTS:\n(none)"));
        assert!(message.contains("USER REQUEST: test signup"));
    }
}
