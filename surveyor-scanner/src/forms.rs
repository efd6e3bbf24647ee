use crate::browser::BrowserPage;
use crate::dom::{self, selector};
use crate::normalize::resolve_href;
use regex::Regex;
use scraper::Html;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::debug;

static IDENTITY_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)user|email|login").expect("valid regex"));

/// One `input`, `select` or `textarea` inside a form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormField {
    pub tag: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub name: String,
    pub id: String,
    pub required: bool,
    pub placeholder: String,
}

impl FormField {
    fn identifies_user(&self) -> bool {
        self.field_type == "email" || IDENTITY_NAME.is_match(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredForm {
    pub page_url: String,
    pub action: String,
    pub method: String,
    pub fields: Vec<FormField>,
    pub is_login_form: bool,
}

/// A password field and a field that identifies the user both present.
pub fn is_login_form(fields: &[FormField]) -> bool {
    fields.iter().any(|f| f.field_type == "password") && fields.iter().any(FormField::identifies_user)
}

/// Enumerate the forms in `html`, which was loaded from `page_url`.
pub fn detect_forms(html: &str, page_url: &str) -> Vec<DiscoveredForm> {
    let doc = Html::parse_document(html);
    let controls = selector("input, select, textarea");

    doc.select(&selector("form"))
        .map(|form| {
            let fields: Vec<FormField> = form
                .select(&controls)
                .filter_map(|el| {
                    let value = el.value();
                    let field_type = dom::control_type(el);
                    let name = value.attr("name").unwrap_or_default().to_string();
                    if field_type == "hidden" && name.is_empty() {
                        return None;
                    }
                    Some(FormField {
                        tag: value.name().to_string(),
                        field_type,
                        name,
                        id: value.id().unwrap_or_default().to_string(),
                        required: value.attr("required").is_some(),
                        placeholder: value.attr("placeholder").unwrap_or_default().to_string(),
                    })
                })
                .collect();

            let action = form
                .value()
                .attr("action")
                .filter(|a| !a.trim().is_empty())
                .and_then(|a| resolve_href(page_url, a))
                .unwrap_or_else(|| page_url.to_string());
            let method = form
                .value()
                .attr("method")
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .unwrap_or("GET")
                .to_ascii_uppercase();

            DiscoveredForm {
                page_url: page_url.to_string(),
                action,
                method,
                is_login_form: is_login_form(&fields),
                fields,
            }
        })
        .collect()
}

/// Forms on the page currently loaded. A page that cannot be read has no forms.
pub async fn detect_page_forms(page: &dyn BrowserPage, page_url: &str) -> Vec<DiscoveredForm> {
    match page.content().await {
        Ok(html) => detect_forms(&html, page_url),
        Err(e) => {
            debug!("Form detection failed on {}: {}", page_url, e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(field_type: &str, name: &str) -> FormField {
        FormField {
            tag: "input".into(),
            field_type: field_type.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_login_form_detection() {
        assert!(is_login_form(&[field("email", ""), field("password", "")]));
        assert!(is_login_form(&[field("text", "username"), field("password", "pw")]));
        assert!(!is_login_form(&[field("text", ""), field("text", "")]));
        assert!(!is_login_form(&[field("password", "pw")]));
    }

    #[test]
    fn test_detect_forms_defaults_and_fields() {
        let html = r#"<html><body>
            <form id="search"><input name="q" placeholder="Search"></form>
            <form action="/session" method="post">
                <input type="email" name="email" id="email" required>
                <input type="password" name="password">
                <input type="hidden" value="orphan">
                <input type="hidden" name="csrf" value="t">
                <select name="lang"><option>en</option></select>
                <textarea name="note"></textarea>
            </form>
        </body></html>"#;
        let forms = detect_forms(html, "http://app.test/login");
        assert_eq!(forms.len(), 2);

        let search = &forms[0];
        assert_eq!(search.action, "http://app.test/login");
        assert_eq!(search.method, "GET");
        assert_eq!(search.fields[0].field_type, "text");
        assert!(!search.is_login_form);

        let login = &forms[1];
        assert_eq!(login.action, "http://app.test/session");
        assert_eq!(login.method, "POST");
        let names: Vec<_> = login.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["email", "password", "csrf", "lang", "note"]);
        assert!(login.fields[0].required);
        assert_eq!(login.fields[0].id, "email");
        assert_eq!(login.fields[3].tag, "select");
        assert_eq!(login.fields[3].field_type, "select-one");
        assert!(login.is_login_form);
    }

    #[test]
    fn test_field_wire_shape() {
        let json = serde_json::to_value(field("email", "e")).unwrap();
        assert_eq!(json["type"], "email");
        let parsed: Vec<FormField> = serde_json::from_str(r#"[{"type":"password"}]"#).unwrap();
        assert_eq!(parsed[0].field_type, "password");
    }
}
