//! Helpers over a parsed HTML document: text, visibility and label
//! resolution, plus [`Locator`] resolution for drivers that work on static
//! markup.

use crate::browser::{Locator, Role};
use scraper::{ElementRef, Html, Selector};

/// Parse a selector that is known at compile time.
pub(crate) fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid built-in selector {css:?}: {e}"))
}

const TEXT_INPUT_TYPES: &[&str] = &["text", "email", "password", "tel", "number", "search", "url"];

/// Text content with runs of whitespace collapsed.
pub fn text_of(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(|t| t.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Truncate to at most `max` characters.
pub fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn hidden_by_markup(el: ElementRef<'_>) -> bool {
    let value = el.value();
    if matches!(value.name(), "head" | "script" | "style" | "template" | "noscript") {
        return true;
    }
    if value.attr("hidden").is_some() || value.attr("aria-hidden") == Some("true") {
        return true;
    }
    if value.name() == "input"
        && value
            .attr("type")
            .is_some_and(|t| t.eq_ignore_ascii_case("hidden"))
    {
        return true;
    }
    if let Some(style) = value.attr("style") {
        let style: String = style
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        if style.contains("display:none") || style.contains("visibility:hidden") {
            return true;
        }
    }
    false
}

/// Whether the element or any ancestor is hidden by markup alone.
pub fn is_hidden(el: ElementRef<'_>) -> bool {
    hidden_by_markup(el) || el.ancestors().filter_map(ElementRef::wrap).any(hidden_by_markup)
}

/// Lower-cased `type` of a form control, as the DOM would report it.
pub fn control_type(el: ElementRef<'_>) -> String {
    let value = el.value();
    match value.name() {
        "textarea" => "textarea".to_string(),
        "select" => {
            if value.attr("multiple").is_some() {
                "select-multiple".to_string()
            } else {
                "select-one".to_string()
            }
        }
        "button" => value
            .attr("type")
            .map(|t| t.to_ascii_lowercase())
            .unwrap_or_else(|| "submit".to_string()),
        _ => value
            .attr("type")
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "text".to_string()),
    }
}

fn is_text_entry(el: ElementRef<'_>) -> bool {
    match el.value().name() {
        "textarea" => true,
        "input" => TEXT_INPUT_TYPES.contains(&control_type(el).as_str()),
        _ => false,
    }
}

/// Text of the `<label for="id">` pointing at the element, if any.
pub fn label_for(doc: &Html, el: ElementRef<'_>) -> Option<String> {
    let id = el.value().id()?;
    let labels = selector("label[for]");
    doc.select(&labels)
        .find(|label| label.value().attr("for") == Some(id))
        .map(text_of)
        .filter(|t| !t.is_empty())
}

/// Text of a `<label>` wrapping the element.
fn wrapping_label(el: ElementRef<'_>) -> Option<String> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().name() == "label")
        .map(text_of)
        .filter(|t| !t.is_empty())
}

fn attr<'a>(el: ElementRef<'a>, name: &str) -> Option<&'a str> {
    el.value().attr(name).map(str::trim).filter(|v| !v.is_empty())
}

/// Label of a text input: `aria-label`, then `placeholder`, then
/// `<label for>`, then `name`.
pub fn input_label(doc: &Html, el: ElementRef<'_>) -> String {
    attr(el, "aria-label")
        .map(str::to_string)
        .or_else(|| attr(el, "placeholder").map(str::to_string))
        .or_else(|| label_for(doc, el))
        .or_else(|| attr(el, "name").map(str::to_string))
        .unwrap_or_default()
}

/// Label of a select: `aria-label`, then `<label for>`, then `name`.
pub fn select_label(doc: &Html, el: ElementRef<'_>) -> String {
    attr(el, "aria-label")
        .map(str::to_string)
        .or_else(|| label_for(doc, el))
        .or_else(|| attr(el, "name").map(str::to_string))
        .unwrap_or_default()
}

/// Accessible name used for role-based lookup.
pub fn accessible_name(el: ElementRef<'_>) -> String {
    if let Some(label) = attr(el, "aria-label") {
        return label.to_string();
    }
    let text = text_of(el);
    if !text.is_empty() {
        return text;
    }
    attr(el, "value")
        .or_else(|| attr(el, "title"))
        .map(str::to_string)
        .unwrap_or_default()
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn role_candidates(role: Role) -> Selector {
    match role {
        Role::Link => selector("a[href], [role=\"link\"]"),
        Role::Button => selector(
            "button, input[type=\"submit\"], input[type=\"button\"], input[type=\"reset\"], [role=\"button\"]",
        ),
    }
}

/// All elements matching the locator, in document order.
pub fn locate<'a>(doc: &'a Html, locator: &Locator) -> Vec<ElementRef<'a>> {
    let controls = selector("input, textarea, select");
    match locator {
        Locator::Css(css) => match Selector::parse(css) {
            Ok(sel) => doc.select(&sel).collect(),
            Err(_) => Vec::new(),
        },
        Locator::Role { role, name } => doc
            .select(&role_candidates(*role))
            .filter(|el| contains_ci(&accessible_name(*el), name))
            .collect(),
        Locator::Text(text) => {
            let all = selector("body *");
            doc.select(&all)
                .filter(|el| !hidden_by_markup(*el) && contains_ci(&text_of(*el), text))
                .filter(|el| {
                    !el.children()
                        .filter_map(ElementRef::wrap)
                        .any(|child| contains_ci(&text_of(child), text))
                })
                .collect()
        }
        Locator::Placeholder(text) => doc
            .select(&controls)
            .filter(|el| {
                attr(*el, "placeholder").is_some_and(|p| p.eq_ignore_ascii_case(text.trim()))
            })
            .collect(),
        Locator::PlaceholderContains(text) => doc
            .select(&controls)
            .filter(|el| attr(*el, "placeholder").is_some_and(|p| contains_ci(p, text)))
            .collect(),
        Locator::Label(text) => doc
            .select(&controls)
            .filter(|el| {
                attr(*el, "aria-label").is_some_and(|l| contains_ci(l, text))
                    || label_for(doc, *el).is_some_and(|l| contains_ci(&l, text))
                    || wrapping_label(*el).is_some_and(|l| contains_ci(&l, text))
            })
            .collect(),
        Locator::Name(name) => doc
            .select(&selector("input, textarea"))
            .filter(|el| {
                el.value()
                    .attr("name")
                    .is_some_and(|n| n.eq_ignore_ascii_case(name))
            })
            .collect(),
        Locator::InputType(kind) => doc
            .select(&selector("input"))
            .filter(|el| control_type(*el) == kind.to_ascii_lowercase())
            .collect(),
        Locator::AnyVisibleInput => doc
            .select(&selector("input, textarea"))
            .filter(|el| is_text_entry(*el) && !is_hidden(*el))
            .collect(),
    }
}

/// The first match, the way `locator.first()` picks it.
pub fn locate_first<'a>(doc: &'a Html, locator: &Locator) -> Option<ElementRef<'a>> {
    locate(doc, locator).into_iter().next()
}

/// The first match exists and is not hidden.
pub fn first_is_visible(doc: &Html, locator: &Locator) -> bool {
    locate_first(doc, locator).is_some_and(|el| !is_hidden(el))
}

pub fn count_matches(html: &str, locator: &Locator) -> usize {
    let doc = Html::parse_document(html);
    locate(&doc, locator).len()
}

/// Text of the document body with scripts and styles left out.
pub fn body_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let Some(body) = doc.select(&selector("body")).next() else {
        return String::new();
    };
    body.descendants()
        .filter_map(|node| node.value().as_text().map(|text| (node, text)))
        .filter(|(node, _)| {
            node.parent()
                .and_then(|parent| parent.value().as_element())
                .is_none_or(|el| !matches!(el.name(), "script" | "style" | "noscript" | "template"))
        })
        .flat_map(|(_, text)| text.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORM: &str = r#"<html><body>
        <label for="mail">Email address</label>
        <input id="mail" name="email" type="email">
        <input name="q" placeholder="Search products">
        <label>Phone <input name="phone" type="tel"></label>
        <input type="hidden" name="csrf" value="x">
        <div style="display: none"><input name="ghost" type="text"></div>
        <a href="/pricing">See  pricing</a>
        <button aria-label="Close dialog">X</button>
        <p>Welcome back, <strong>friend</strong></p>
    </body></html>"#;

    #[test]
    fn test_body_text_skips_scripts() {
        let html = "<body><h1>Hi</h1><script>var x = 1;</script><p>there</p></body>";
        assert_eq!(body_text(html), "Hi there");
    }

    #[test]
    fn test_count_matches() {
        assert_eq!(count_matches(FORM, &Locator::Css("input".into())), 5);
        assert_eq!(count_matches(FORM, &Locator::Css(".missing".into())), 0);
    }

    #[test]
    fn test_text_of_collapses_whitespace() {
        let doc = Html::parse_document(FORM);
        let link = locate_first(&doc, &Locator::Css("a".into())).unwrap();
        assert_eq!(text_of(link), "See pricing");
    }

    #[test]
    fn test_hidden_detection() {
        let doc = Html::parse_document(FORM);
        let ghost = locate_first(&doc, &Locator::Name("ghost".into())).unwrap();
        assert!(is_hidden(ghost));
        let csrf = locate_first(&doc, &Locator::Css("input[name=csrf]".into())).unwrap();
        assert!(is_hidden(csrf));
        let email = locate_first(&doc, &Locator::Name("EMAIL".into())).unwrap();
        assert!(!is_hidden(email));
    }

    #[test]
    fn test_label_resolution() {
        let doc = Html::parse_document(FORM);
        let email = locate_first(&doc, &Locator::Name("email".into())).unwrap();
        assert_eq!(input_label(&doc, email), "Email address");
        let search = locate_first(&doc, &Locator::Name("q".into())).unwrap();
        assert_eq!(input_label(&doc, search), "Search products");
    }

    #[test]
    fn test_locators() {
        let doc = Html::parse_document(FORM);
        assert_eq!(locate(&doc, &Locator::Label("email".into())).len(), 1);
        assert_eq!(locate(&doc, &Locator::Label("Phone".into())).len(), 1);
        assert_eq!(locate(&doc, &Locator::Placeholder("search products".into())).len(), 1);
        assert_eq!(locate(&doc, &Locator::PlaceholderContains("search".into())).len(), 1);
        assert_eq!(locate(&doc, &Locator::InputType("tel".into())).len(), 1);
        assert!(first_is_visible(&doc, &Locator::role(Role::Link, "pricing")));
        assert!(first_is_visible(&doc, &Locator::role(Role::Button, "close dialog")));
        assert!(!first_is_visible(&doc, &Locator::role(Role::Button, "Submit")));
    }

    #[test]
    fn test_text_locator_picks_innermost() {
        let doc = Html::parse_document(FORM);
        let found = locate(&doc, &Locator::Text("friend".into()));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value().name(), "strong");
    }

    #[test]
    fn test_any_visible_input_skips_hidden() {
        let doc = Html::parse_document(FORM);
        let first = locate_first(&doc, &Locator::AnyVisibleInput).unwrap();
        assert_eq!(first.value().attr("name"), Some("email"));
        assert!(locate(&doc, &Locator::AnyVisibleInput)
            .iter()
            .all(|el| el.value().attr("name") != Some("ghost")));
    }
}
