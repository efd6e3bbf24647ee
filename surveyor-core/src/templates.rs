//! Standard Playwright spec files built from discovery results, one per
//! test category. Each generator returns `None` when it has nothing to test.

use crate::ai::codegen::js_escape;
use crate::model::{DiscoveredApi, StoredForm, StoredPage};
use std::collections::BTreeMap;
use url::Url;

const HEADER: &str = "const { test, expect } = require('@playwright/test');";

/// JSON string literal, which is also a valid JavaScript string literal.
fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("'{}'", js_escape(s)))
}

fn describe(title: &str, timeout_ms: u32, tests: &[String]) -> String {
    format!(
        "{}\n\ntest.describe('{}', () => {{\n  test.setTimeout({});\n{}\n}});\n",
        HEADER,
        title,
        timeout_ms,
        tests.join("\n")
    )
}

/// Number of test declarations in a spec file.
pub fn count_tests(code: &str) -> usize {
    code.matches("test(").count()
}

/// One load check per page: no server error and no console errors.
pub fn page_tests(pages: &[StoredPage]) -> Option<String> {
    if pages.is_empty() {
        return None;
    }
    let tests: Vec<String> = pages
        .iter()
        .map(|p| {
            format!(
                r#"
  test('Page loads: {name}', async ({{ page }}) => {{
    const errors = [];
    page.on('console', msg => {{ if (msg.type() === 'error') errors.push(msg.text()); }});
    const response = await page.goto({url}, {{ waitUntil: 'domcontentloaded', timeout: 30000 }});
    expect(response.status()).toBeLessThan(500);
    expect(errors.length, 'Console errors: ' + errors.join('; ')).toBe(0);
  }});"#,
                name = js_escape(&p.url),
                url = js_string(&p.url)
            )
        })
        .collect();
    Some(describe("Page Tests", 60000, &tests))
}

/// Endpoints that answered 401/403 during discovery are called without
/// credentials and must refuse; the rest are called with them and must
/// answer promptly without a server error.
pub fn api_tests(apis: &[DiscoveredApi], auth_headers: &BTreeMap<String, String>) -> Option<String> {
    if apis.is_empty() {
        return None;
    }
    let headers = serde_json::to_string(auth_headers).unwrap_or_else(|_| "{}".to_string());
    let tests: Vec<String> = apis
        .iter()
        .map(|a| {
            let method = a.method.to_lowercase();
            let name = format!("{} {}", a.method, js_escape(&a.url));
            let url = js_string(&a.url);
            if a.requires_auth {
                format!(
                    r#"
  test('API {name} rejects anonymous access', async ({{ request }}) => {{
    const response = await request.{method}({url}, {{ timeout: 15000 }});
    expect([401, 403]).toContain(response.status());
  }});"#
                )
            } else {
                format!(
                    r#"
  test('API {name} returns valid response', async ({{ request }}) => {{
    const start = Date.now();
    const response = await request.{method}({url}, {{
      headers: {headers},
      timeout: 15000,
    }});
    const elapsed = Date.now() - start;
    expect(response.status(), 'Server error').toBeLessThan(500);
    expect(elapsed, 'Response too slow: ' + elapsed + 'ms').toBeLessThan(5000);
    const contentType = response.headers()['content-type'] || '';
    if (contentType.includes('json')) {{
      const body = await response.text();
      expect(() => JSON.parse(body), 'Invalid JSON').not.toThrow();
    }}
  }});"#
                )
            }
        })
        .collect();
    Some(describe("API Tests", 30000, &tests))
}

fn form_subtests(index: usize, form: &StoredForm) -> Vec<String> {
    let mut tests = Vec::new();
    if form.fields.is_empty() {
        return tests;
    }
    let name = js_escape(&format!("Form #{} on {}", index + 1, form.page_url));
    let page_url = js_string(&form.page_url);

    if form.fields.iter().any(|f| f.required) {
        let path = Url::parse(&form.page_url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| form.page_url.clone());
        tests.push(format!(
            r#"
  test('{name}: empty required fields rejected', async ({{ page }}) => {{
    await page.goto({page_url}, {{ waitUntil: 'domcontentloaded', timeout: 15000 }});
    const submit = await page.$('button[type="submit"], input[type="submit"]');
    if (submit) {{
      await submit.click();
      await page.waitForTimeout(500);
    }}
    const url = page.url();
    const hasValidation = await page.$$eval('[class*="error"], [class*="invalid"], .field-error, .validation-error, :invalid',
      els => els.length > 0
    );
    expect(url.includes({path}) || hasValidation).toBeTruthy();
  }});"#,
            path = js_string(&path)
        ));
    }

    let email = form
        .fields
        .iter()
        .find(|f| f.field_type == "email" || f.name.to_lowercase().contains("email"));
    if let Some(field) = email {
        let selector = if field.id.is_empty() {
            format!("input[name=\"{}\"]", field.name)
        } else {
            format!("#{}", field.id)
        };
        tests.push(format!(
            r#"
  test('{name}: invalid email rejected', async ({{ page }}) => {{
    await page.goto({page_url}, {{ waitUntil: 'domcontentloaded', timeout: 15000 }});
    const input = await page.$({selector});
    if (input) {{
      await input.fill('not-an-email');
      const submit = await page.$('button[type="submit"], input[type="submit"]');
      if (submit) await submit.click();
      await page.waitForTimeout(500);
      const isInvalid = await input.evaluate(el => !el.checkValidity());
      expect(isInvalid).toBeTruthy();
    }}
  }});"#,
            selector = js_string(&selector)
        ));
    }
    tests
}

/// Validation checks: submitting without required fields must not succeed,
/// and email fields must reject malformed addresses.
pub fn form_tests(forms: &[StoredForm]) -> Option<String> {
    let tests: Vec<String> = forms
        .iter()
        .enumerate()
        .flat_map(|(i, form)| form_subtests(i, form))
        .collect();
    if tests.is_empty() {
        return None;
    }
    Some(describe("Form Tests", 30000, &tests))
}

const INJECTION_PAYLOAD: &str = "id=1' OR '1'='1";
const XSS_PAYLOAD: &str = r#"<script>alert("xss")</script>"#;
const MAX_INJECTION_APIS: usize = 10;
const MAX_XSS_PAGES: usize = 5;
const MAX_LOAD_ENDPOINTS: usize = 10;

/// Simultaneous users simulated by the load spec.
pub const LOAD_CONCURRENCY: usize = 3;

/// Anonymous calls to protected endpoints, SQL error leakage on GET
/// endpoints, reflected script injection on form pages and a security
/// header check on the base URL. The header check is always emitted.
pub fn security_tests(pages: &[StoredPage], apis: &[DiscoveredApi], base_url: &str) -> Option<String> {
    let mut tests = Vec::new();

    for a in apis.iter().filter(|a| a.requires_auth) {
        tests.push(format!(
            r#"
  test('Unauth access denied: {method} {name}', async ({{ request }}) => {{
    const response = await request.{call}({url}, {{ timeout: 10000 }});
    expect([401, 403]).toContain(response.status());
  }});"#,
            method = a.method,
            name = js_escape(&a.url),
            call = a.method.to_lowercase(),
            url = js_string(&a.url)
        ));
    }

    for a in apis
        .iter()
        .filter(|a| a.method.eq_ignore_ascii_case("GET"))
        .take(MAX_INJECTION_APIS)
    {
        let separator = if a.url.contains('?') { '&' } else { '?' };
        let injected = format!("{}{}{}", a.url, separator, INJECTION_PAYLOAD);
        tests.push(format!(
            r#"
  test('SQL injection rejected: {name}', async ({{ request }}) => {{
    const response = await request.get({url}, {{ timeout: 10000 }});
    const body = (await response.text()).toLowerCase();
    for (const leak of ['sql', 'syntax error', 'mysql', 'sqlite']) {{
      expect(body).not.toContain(leak);
    }}
  }});"#,
            name = js_escape(&a.url),
            url = js_string(&injected)
        ));
    }

    for p in pages.iter().filter(|p| p.has_forms).take(MAX_XSS_PAGES) {
        tests.push(format!(
            r#"
  test('XSS reflected check: {name}', async ({{ page }}) => {{
    await page.goto({url}, {{ waitUntil: 'domcontentloaded', timeout: 15000 }});
    const inputs = await page.$$('input[type="text"]:visible, input[type="search"]:visible, input:not([type]):visible');
    for (const input of inputs.slice(0, 3)) {{
      await input.fill({payload}).catch(() => {{}});
    }}
    const submit = await page.$('button[type="submit"], input[type="submit"]');
    if (submit) await submit.click().catch(() => {{}});
    await page.waitForTimeout(1000);
    const html = await page.content();
    expect(html).not.toContain({payload});
  }});"#,
            name = js_escape(&p.url),
            url = js_string(&p.url),
            payload = js_string(XSS_PAYLOAD)
        ));
    }

    tests.push(format!(
        r#"
  test('Security headers present on main page', async ({{ request }}) => {{
    const response = await request.get({url}, {{ timeout: 10000 }});
    const headers = response.headers();
    const issues = [];
    if (!headers['x-frame-options'] && !headers['content-security-policy']) {{
      issues.push('Missing X-Frame-Options or CSP frame-ancestors');
    }}
    if (!headers['x-content-type-options']) {{
      issues.push('Missing X-Content-Type-Options');
    }}
    expect(issues.length, 'Security header issues: ' + issues.join('; ')).toBeLessThanOrEqual(2);
  }});"#,
        url = js_string(base_url)
    ));

    Some(describe("Security Tests", 30000, &tests))
}

/// Concurrent loads of up to ten pages and ten GET endpoints. Fails when a
/// fifth of the requests error or the p95 time reaches ten seconds.
pub fn load_tests(pages: &[StoredPage], apis: &[DiscoveredApi], concurrency: usize) -> Option<String> {
    let mut endpoints: Vec<serde_json::Value> = pages
        .iter()
        .take(MAX_LOAD_ENDPOINTS)
        .map(|p| serde_json::json!({"type": "page", "url": p.url}))
        .collect();
    endpoints.extend(
        apis.iter()
            .filter(|a| a.method.eq_ignore_ascii_case("GET"))
            .take(MAX_LOAD_ENDPOINTS)
            .map(|a| serde_json::json!({"type": "api", "method": a.method, "url": a.url})),
    );
    if endpoints.is_empty() {
        return None;
    }
    let endpoints = serde_json::to_string_pretty(&endpoints).ok()?;

    Some(format!(
        r#"{HEADER}

const CONCURRENCY = {concurrency};
const ENDPOINTS = {endpoints};

function summarize(results) {{
  const errors = results.filter(r => r.error || r.status >= 500);
  const times = results.filter(r => !r.error).map(r => r.time).sort((a, b) => a - b);
  const p95 = times[Math.floor(times.length * 0.95)] || 0;
  const avg = times.length ? Math.round(times.reduce((a, b) => a + b, 0) / times.length) : 0;
  return {{ errors, p95, avg }};
}}

test.describe('Load Tests', () => {{
  test.setTimeout(120000);

  test('Concurrent page loads ({concurrency} users)', async ({{ browser }}) => {{
    const pages = ENDPOINTS.filter(e => e.type === 'page');
    if (pages.length === 0) return;
    const contexts = await Promise.all(
      Array.from({{ length: CONCURRENCY }}, () => browser.newContext())
    );
    const results = [];
    for (const ep of pages) {{
      results.push(...await Promise.all(contexts.map(async (ctx) => {{
        const page = await ctx.newPage();
        const start = Date.now();
        try {{
          const response = await page.goto(ep.url, {{ waitUntil: 'domcontentloaded', timeout: 30000 }});
          return {{ url: ep.url, status: response.status(), time: Date.now() - start, error: null }};
        }} catch (err) {{
          return {{ url: ep.url, status: 0, time: Date.now() - start, error: err.message }};
        }} finally {{
          await page.close();
        }}
      }})));
    }}
    for (const ctx of contexts) await ctx.close();

    const {{ errors, p95, avg }} = summarize(results);
    console.log('Load test results:', {{ total: results.length, errors: errors.length, p95, avg }});
    expect(errors.length, 'Server errors under load: ' + errors.map(e => e.url).join(', ')).toBeLessThan(results.length * 0.2);
    expect(p95, 'p95 response time too high: ' + p95 + 'ms').toBeLessThan(10000);
  }});

  test('Concurrent API requests ({concurrency} users)', async ({{ request }}) => {{
    const apis = ENDPOINTS.filter(e => e.type === 'api');
    if (apis.length === 0) return;
    const results = [];
    for (const ep of apis) {{
      results.push(...await Promise.all(Array.from({{ length: CONCURRENCY }}, async () => {{
        const start = Date.now();
        try {{
          const response = await request.get(ep.url, {{ timeout: 15000 }});
          return {{ url: ep.url, status: response.status(), time: Date.now() - start, error: null }};
        }} catch (err) {{
          return {{ url: ep.url, status: 0, time: Date.now() - start, error: err.message }};
        }}
      }})));
    }}

    const {{ errors, p95, avg }} = summarize(results);
    console.log('API load test results:', {{ total: results.length, errors: errors.length, p95, avg }});
    expect(errors.length, 'API errors under load').toBeLessThan(results.length * 0.2);
    expect(p95, 'API p95 too high: ' + p95 + 'ms').toBeLessThan(10000);
  }});
}});
"#
    ))
}
