//! Turns validated test plans into a Playwright spec file.
//!
//! Every step is wrapped in its own `try`/`catch`. Interaction steps log
//! and carry on, assertions rethrow so the test fails.

use super::plan::{DEFAULT_SUCCESS_PATTERN, Step, TestPlan};
use super::strategy::{FillStrategy, css_attr_escape, fill_strategies, select_locators};
use crate::error::GenerationError;
use std::collections::BTreeMap;
use surveyor_scanner::{Locator, Role};

const STEP_COMMENT_LEN: usize = 80;

/// Escape for a single-quoted JavaScript string literal.
pub fn js_escape(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

/// `base` and `path` joined without a doubled slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

/// The Playwright expression locating the same elements `locator` does.
pub fn playwright_locator(locator: &Locator) -> String {
    match locator {
        Locator::Css(css) => format!("page.locator('{}')", js_escape(css)),
        Locator::Role { role, name } => format!(
            "page.getByRole('{}', {{ name: '{}' }})",
            role.as_str(),
            js_escape(name)
        ),
        Locator::Text(text) => format!("page.getByText('{}')", js_escape(text)),
        Locator::Placeholder(text) => format!("page.getByPlaceholder('{}')", js_escape(text)),
        Locator::PlaceholderContains(text) => {
            let attr = js_escape(&css_attr_escape(text));
            format!(
                "page.locator('input[placeholder*=\"{0}\" i], textarea[placeholder*=\"{0}\" i]')",
                attr
            )
        }
        Locator::Label(text) => format!("page.getByLabel('{}')", js_escape(text)),
        Locator::Name(name) => {
            let attr = js_escape(&css_attr_escape(name));
            format!(
                "page.locator('input[name=\"{0}\" i], textarea[name=\"{0}\" i]')",
                attr
            )
        }
        Locator::InputType(input_type) => {
            format!("page.locator('input[type=\"{}\"]')", js_escape(input_type))
        }
        Locator::AnyVisibleInput => "page.locator('input:visible')".to_string(),
    }
}

fn step_comment(step: &Step) -> String {
    let json = serde_json::to_string(step).unwrap_or_default();
    let short: String = json.chars().take(STEP_COMMENT_LEN).collect();
    format!("    // {}: {}", step.action_name(), short)
}

fn headers_literal(auth_headers: &BTreeMap<String, String>) -> Option<String> {
    if auth_headers.is_empty() {
        None
    } else {
        serde_json::to_string(auth_headers).ok()
    }
}

fn fixtures(plan: &TestPlan) -> &'static str {
    if plan.is_api_only() {
        "request"
    } else if plan.uses_api() {
        "page, request"
    } else {
        "page"
    }
}

struct Emitter<'a> {
    lines: Vec<String>,
    base_url: &'a str,
    auth_headers: Option<String>,
}

impl Emitter<'_> {
    fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    fn click(&mut self, role: Role, text: &str, settle_ms: u32) {
        let target = format!("{}.first()", playwright_locator(&Locator::role(role, text)));
        self.push(format!(
            "      await {}.waitFor({{ state: 'visible', timeout: 15000 }});",
            target
        ));
        self.push("      previousUrl = page.url();");
        self.push(format!("      await {}.click();", target));
        self.push("      await page.waitForLoadState('networkidle', { timeout: 15000 }).catch(() => {});");
        self.push(format!("      await page.waitForTimeout({});", settle_ms));
    }

    fn fill(&mut self, field: &str, value: &str) {
        let value = js_escape(value);
        self.push("      {");
        self.push("        let filled = false;");
        for (i, (strategy, locator)) in fill_strategies(field).into_iter().enumerate() {
            let n = i + 1;
            let var = format!("s{}", n);
            let expr = format!("{}.first()", playwright_locator(&locator));
            self.push(format!("        // Strategy {}: {}", n, strategy.description()));
            let body = if strategy == FillStrategy::AnyVisibleInput {
                format!(
                    "const {v} = {e}; await {v}.waitFor({{ state: 'visible', timeout: 10000 }}); await {v}.fill('{val}'); filled = true;",
                    v = var,
                    e = expr,
                    val = value
                )
            } else {
                format!(
                    "const {v} = {e}; if (await {v}.isVisible().catch(() => false)) {{ await {v}.fill('{val}'); filled = true; }}",
                    v = var,
                    e = expr,
                    val = value
                )
            };
            if n == 1 {
                self.push(format!("        {{ {} }}", body));
            } else {
                self.push(format!("        if (!filled) {{ {} }}", body));
            }
        }
        self.push(format!(
            "        if (!filled) throw new Error('Could not find field: {}');",
            js_escape(field)
        ));
        self.push("      }");
    }

    fn select(&mut self, field: &str, value: &str) {
        let [by_label, by_name] = select_locators(field);
        let value = js_escape(value);
        self.push("      {");
        self.push(format!("        const sel = {}.first();", playwright_locator(&by_label)));
        self.push("        if (await sel.isVisible().catch(() => false)) {");
        self.push(format!("          await sel.selectOption({{ label: '{}' }});", value));
        self.push("        } else {");
        self.push(format!(
            "          await {}.first().selectOption({{ label: '{}' }});",
            playwright_locator(&by_name),
            value
        ));
        self.push("        }");
        self.push("      }");
    }

    fn api_call(&mut self, method: &str, path: &str, body: Option<&serde_json::Value>, assert_status: Option<u16>) {
        let url = js_escape(&join_url(self.base_url, path));
        let mut options = Vec::new();
        if let Some(body) = body {
            options.push(format!("data: {}", body));
        }
        if let Some(headers) = &self.auth_headers {
            options.push(format!("headers: {}", headers));
        }
        let options = if options.is_empty() {
            String::new()
        } else {
            format!(", {{ {} }}", options.join(", "))
        };
        self.push(format!(
            "      const resp = await request.{}('{}'{});",
            method, url, options
        ));
        if let Some(status) = assert_status {
            self.push(format!("      expect(resp.status()).toBe({});", status));
        }
    }

    fn step(&mut self, step: &Step) {
        match step {
            Step::Goto { path } => {
                self.push(format!(
                    "      await page.goto('{}', {{ waitUntil: 'networkidle', timeout: 30000 }});",
                    js_escape(&join_url(self.base_url, path))
                ));
                self.push("      await page.waitForTimeout(1500);");
                self.push("      previousUrl = page.url();");
            }
            Step::ClickLink { text } => self.click(Role::Link, text, 1000),
            Step::ClickButton { text } => self.click(Role::Button, text, 1500),
            Step::Fill { field, value } => self.fill(field, value),
            Step::Select { field, value } => self.select(field, value),
            Step::Wait { seconds } => {
                let ms = (seconds.max(0.0) * 1000.0).round() as u64;
                self.push(format!("      await page.waitForTimeout({});", ms));
            }
            Step::AssertUrlContains { text } => {
                self.push("      const currentUrl = page.url();");
                self.push(format!(
                    "      const target = '{}'.toLowerCase();",
                    js_escape(text)
                ));
                self.push("      expect(currentUrl.toLowerCase()).toContain(target);");
            }
            Step::AssertUrlChanged => self.push("      expect(page.url()).not.toBe(previousUrl);"),
            Step::AssertUrlNotChanged => self.push("      expect(page.url()).toBe(previousUrl);"),
            Step::AssertVisible { text } => self.push(format!(
                "      await expect({}.first()).toBeVisible({{ timeout: 10000 }});",
                playwright_locator(&Locator::Text(text.clone()))
            )),
            Step::AssertNotVisible { text } => self.push(format!(
                "      await expect({}.first()).not.toBeVisible({{ timeout: 5000 }});",
                playwright_locator(&Locator::Text(text.clone()))
            )),
            Step::AssertElementExists { selector } => self.push(format!(
                "      await expect({}.first()).toBeVisible({{ timeout: 10000 }});",
                playwright_locator(&Locator::Css(selector.clone()))
            )),
            Step::AssertElementCount { selector, min } => {
                self.push(format!(
                    "      const count = await {}.count();",
                    playwright_locator(&Locator::Css(selector.clone()))
                ));
                self.push(format!("      expect(count).toBeGreaterThanOrEqual({});", min));
            }
            Step::AssertPageHasText { pattern } => {
                let pattern = if pattern.trim().is_empty() {
                    DEFAULT_SUCCESS_PATTERN
                } else {
                    pattern.as_str()
                };
                self.push("      {");
                self.push("        const body = await page.locator('body').innerText();");
                self.push(format!(
                    "        const pattern = new RegExp('{}', 'i');",
                    js_escape(pattern)
                ));
                self.push("        expect(body).toMatch(pattern);");
                self.push("      }");
            }
            Step::ApiGet { path, assert_status } => self.api_call("get", path, None, *assert_status),
            Step::ApiPost {
                path,
                body,
                assert_status,
            } => self.api_call("post", path, Some(body), *assert_status),
        }
    }

    fn test(&mut self, plan: &TestPlan) {
        self.push(format!(
            "  test('{}', async ({{ {} }}) => {{",
            js_escape(&plan.name),
            fixtures(plan)
        ));
        if !plan.is_api_only() {
            self.push("    let previousUrl = '';");
        }
        for step in &plan.steps {
            self.push(step_comment(step));
            self.push("    try {");
            self.step(step);
            self.push("    } catch (e) {");
            self.push(format!(
                "      console.log('[Step failed] {}: ' + String(e.message).substring(0, 200));",
                step.action_name()
            ));
            if step.is_assertion() {
                self.push("      throw e;");
            }
            self.push("    }");
            self.push("");
        }
        self.push("  });");
        self.push("");
    }
}

/// Render `plans` as one `describe` block of Playwright tests.
pub fn plan_to_playwright(
    plans: &[TestPlan],
    base_url: &str,
    auth_headers: &BTreeMap<String, String>,
) -> String {
    let mut emitter = Emitter {
        lines: Vec::new(),
        base_url,
        auth_headers: headers_literal(auth_headers),
    };
    emitter.push("const { test, expect } = require('@playwright/test');");
    emitter.push("");
    emitter.push("test.describe('Custom AI Tests', () => {");
    emitter.push("  test.setTimeout(120000);");
    emitter.push("");
    for plan in plans {
        emitter.test(plan);
    }
    emitter.push("});");
    emitter.lines.join("\n")
}

/// Generated code must declare a test and assert something.
pub fn validate_test_code(code: &str) -> Result<(), GenerationError> {
    if !code.contains("test(") {
        return Err(GenerationError::InvalidCode("no test declaration".into()));
    }
    if !code.contains("expect(") {
        return Err(GenerationError::InvalidCode("no assertion".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::plan::parse_plan;

    fn render(json: &str) -> String {
        let plans = parse_plan(json).unwrap();
        plan_to_playwright(&plans, "http://localhost:3000/", &BTreeMap::new())
    }

    #[test]
    fn test_js_escape() {
        assert_eq!(js_escape("it's a\\b\nc"), "it\\'s a\\\\b\\nc");
    }

    #[test]
    fn test_goto_and_click_button() {
        let code = render(
            r#"[{"name": "Sign up", "steps": [
                {"action": "goto", "path": "/signup"},
                {"action": "click_button", "text": "Create account"},
                {"action": "assert_url_changed"}]}]"#,
        );
        assert!(code.starts_with("const { test, expect } = require('@playwright/test');"));
        assert!(code.contains("test.describe('Custom AI Tests'"));
        assert!(code.contains("test('Sign up', async ({ page }) => {"));
        assert!(code.contains("let previousUrl = '';"));
        assert!(code.contains(
            "await page.goto('http://localhost:3000/signup', { waitUntil: 'networkidle', timeout: 30000 });"
        ));
        let record = code.find("previousUrl = page.url();\n      await page.getByRole('button'").unwrap();
        assert!(record > 0);
        assert!(code.contains("expect(page.url()).not.toBe(previousUrl);"));
    }

    #[test]
    fn test_click_link_records_previous_url() {
        let code = render(
            r#"[{"name": "Pricing", "steps": [
                {"action": "goto", "path": "/"},
                {"action": "click_link", "text": "Pricing"},
                {"action": "assert_url_not_changed"}]}]"#,
        );
        let click = code.find("// click_link").unwrap();
        let assert = code.find("// assert_url_not_changed").unwrap();
        assert!(code[click..assert].contains(
            "previousUrl = page.url();\n      await page.getByRole('link', { name: 'Pricing' }).first().click();"
        ));
    }

    #[test]
    fn test_only_assertions_rethrow() {
        let code = render(
            r#"[{"name": "t", "steps": [
                {"action": "click_link", "text": "Pricing"},
                {"action": "assert_visible", "text": "Plans"}]}]"#,
        );
        let click = code.find("// click_link").unwrap();
        let assert = code.find("// assert_visible").unwrap();
        assert!(!code[click..assert].contains("throw e;"));
        assert!(code[assert..].contains("throw e;"));
    }

    #[test]
    fn test_fill_tries_strategies_in_order() {
        let code = render(
            r#"[{"name": "t", "steps": [{"action": "fill", "field": "Email", "value": "a@b.c"},
                {"action": "assert_url_changed"}]}]"#,
        );
        let positions: Vec<usize> = [
            "getByPlaceholder('Email')",
            "getByLabel('Email')",
            "input[name=\"Email\" i]",
            "input[placeholder*=\"Email\" i]",
            "input[type=\"email\"]",
            "input:visible",
        ]
        .iter()
        .map(|needle| code.find(needle).unwrap())
        .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(code.contains("throw new Error('Could not find field: Email')"));
    }

    #[test]
    fn test_api_steps_use_request_fixture_and_headers() {
        let plans = parse_plan(
            r#"[{"name": "users", "steps": [{"action": "api_get", "path": "/api/users", "assert_status": 200}]}]"#,
        )
        .unwrap();
        let headers = BTreeMap::from([("Authorization".to_string(), "Bearer t".to_string())]);
        let code = plan_to_playwright(&plans, "http://localhost:3000", &headers);
        assert!(code.contains("async ({ request }) =>"));
        assert!(!code.contains("previousUrl"));
        assert!(code.contains(
            r#"await request.get('http://localhost:3000/api/users', { headers: {"Authorization":"Bearer t"} });"#
        ));
        assert!(code.contains("expect(resp.status()).toBe(200);"));
    }

    #[test]
    fn test_mixed_plan_gets_both_fixtures() {
        let code = render(
            r#"[{"name": "t", "steps": [{"action": "goto", "path": "/"},
                {"action": "api_post", "path": "/api/login", "body": {"email": "x"}, "assert_status": 401}]}]"#,
        );
        assert!(code.contains("async ({ page, request }) =>"));
        assert!(code.contains(r#"{ data: {"email":"x"} }"#));
    }

    #[test]
    fn test_validation() {
        assert!(validate_test_code("test('a', () => { expect(1).toBe(1); })").is_ok());
        assert!(matches!(
            validate_test_code("console.log('hi')"),
            Err(GenerationError::InvalidCode(_))
        ));
        assert!(validate_test_code("test('a', () => {})").is_err());
    }
}
