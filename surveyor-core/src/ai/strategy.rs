use serde::Serialize;
use surveyor_scanner::Locator;

/// Ways of finding the field a `fill` step names, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FillStrategy {
    Placeholder,
    Label,
    Name,
    PlaceholderContains,
    InputType,
    AnyVisibleInput,
}

impl FillStrategy {
    pub fn description(&self) -> &'static str {
        match self {
            FillStrategy::Placeholder => "placeholder",
            FillStrategy::Label => "label",
            FillStrategy::Name => "name attribute",
            FillStrategy::PlaceholderContains => "partial placeholder",
            FillStrategy::InputType => "input type",
            FillStrategy::AnyVisibleInput => "any visible input",
        }
    }
}

/// Input type implied by a field's name.
pub fn guess_input_type(field: &str) -> &'static str {
    let lower = field.to_lowercase();
    if lower.contains("email") {
        "email"
    } else if lower.contains("password") {
        "password"
    } else if lower.contains("phone") || lower.contains("tel") {
        "tel"
    } else if lower.contains("search") {
        "search"
    } else if lower.contains("url") || lower.contains("website") {
        "url"
    } else {
        "text"
    }
}

pub fn fill_strategies(field: &str) -> Vec<(FillStrategy, Locator)> {
    vec![
        (FillStrategy::Placeholder, Locator::Placeholder(field.to_string())),
        (FillStrategy::Label, Locator::Label(field.to_string())),
        (FillStrategy::Name, Locator::Name(field.to_string())),
        (
            FillStrategy::PlaceholderContains,
            Locator::PlaceholderContains(field.to_string()),
        ),
        (
            FillStrategy::InputType,
            Locator::InputType(guess_input_type(field).to_string()),
        ),
        (FillStrategy::AnyVisibleInput, Locator::AnyVisibleInput),
    ]
}

/// Where a `select` step looks: the label first, then the `name` attribute.
pub fn select_locators(field: &str) -> [Locator; 2] {
    [
        Locator::Label(field.to_string()),
        Locator::Css(format!("select[name=\"{}\"]", css_attr_escape(field))),
    ]
}

pub(crate) fn css_attr_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
