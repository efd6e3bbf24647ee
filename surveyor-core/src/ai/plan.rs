//! The constrained JSON test plan a model is asked to produce, and its
//! validation. A plan is only ever turned into code after it parses here.

use crate::error::GenerationError;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

pub const DEFAULT_SUCCESS_PATTERN: &str = "confirm|success|welcome|created|thank";

static LEADING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^```(?:json)?\n?").expect("valid regex"));
static TRAILING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n?```$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestPlan {
    pub name: String,
    pub steps: Vec<Step>,
}

impl TestPlan {
    /// Plans made only of API calls need no browser page.
    pub fn is_api_only(&self) -> bool {
        self.steps.iter().all(Step::is_api)
    }

    pub fn uses_api(&self) -> bool {
        self.steps.iter().any(Step::is_api)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    Goto {
        #[serde(default)]
        path: String,
    },
    ClickLink {
        text: String,
    },
    ClickButton {
        text: String,
    },
    Fill {
        field: String,
        #[serde(deserialize_with = "lenient_string")]
        value: String,
    },
    Select {
        field: String,
        #[serde(deserialize_with = "lenient_string")]
        value: String,
    },
    Wait {
        #[serde(default = "default_wait")]
        seconds: f64,
    },
    AssertUrlContains {
        text: String,
    },
    AssertUrlChanged,
    AssertUrlNotChanged,
    AssertVisible {
        text: String,
    },
    AssertNotVisible {
        text: String,
    },
    AssertElementExists {
        selector: String,
    },
    AssertElementCount {
        selector: String,
        #[serde(default = "default_min")]
        min: usize,
    },
    AssertPageHasText {
        #[serde(default = "default_pattern")]
        pattern: String,
    },
    ApiGet {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        assert_status: Option<u16>,
    },
    ApiPost {
        path: String,
        #[serde(default = "empty_body")]
        body: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        assert_status: Option<u16>,
    },
}

fn default_wait() -> f64 {
    2.0
}

fn default_min() -> usize {
    1
}

fn default_pattern() -> String {
    DEFAULT_SUCCESS_PATTERN.to_string()
}

fn empty_body() -> Value {
    Value::Object(Default::default())
}

/// Models sometimes emit numbers where strings are expected (`"value": 42`).
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string, got {}",
            other
        ))),
    }
}

impl Step {
    pub fn action_name(&self) -> &'static str {
        match self {
            Step::Goto { .. } => "goto",
            Step::ClickLink { .. } => "click_link",
            Step::ClickButton { .. } => "click_button",
            Step::Fill { .. } => "fill",
            Step::Select { .. } => "select",
            Step::Wait { .. } => "wait",
            Step::AssertUrlContains { .. } => "assert_url_contains",
            Step::AssertUrlChanged => "assert_url_changed",
            Step::AssertUrlNotChanged => "assert_url_not_changed",
            Step::AssertVisible { .. } => "assert_visible",
            Step::AssertNotVisible { .. } => "assert_not_visible",
            Step::AssertElementExists { .. } => "assert_element_exists",
            Step::AssertElementCount { .. } => "assert_element_count",
            Step::AssertPageHasText { .. } => "assert_page_has_text",
            Step::ApiGet { .. } => "api_get",
            Step::ApiPost { .. } => "api_post",
        }
    }

    pub fn is_api(&self) -> bool {
        matches!(self, Step::ApiGet { .. } | Step::ApiPost { .. })
    }

    /// Failing assertions fail the test case; any other failing step is
    /// logged and the case moves on.
    pub fn is_assertion(&self) -> bool {
        match self {
            Step::ApiGet { assert_status, .. } | Step::ApiPost { assert_status, .. } => {
                assert_status.is_some()
            }
            other => other.action_name().starts_with("assert_"),
        }
    }
}

/// Remove a surrounding Markdown code fence, if any.
pub fn strip_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_leading = LEADING_FENCE.replace(trimmed, "");
    TRAILING_FENCE.replace(&without_leading, "").into_owned()
}

/// Parse and validate model output into test plans.
pub fn parse_plan(raw: &str) -> Result<Vec<TestPlan>, GenerationError> {
    let cleaned = strip_fences(raw);
    let value: Value = serde_json::from_str(&cleaned)
        .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;

    let items = match value {
        Value::Array(items) if !items.is_empty() => items,
        _ => return Err(GenerationError::EmptyPlan),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let plan: TestPlan = serde_json::from_value(item)
                .map_err(|e| GenerationError::InvalidPlan(format!("test {}: {}", i + 1, e)))?;
            if plan.name.trim().is_empty() {
                return Err(GenerationError::InvalidPlan(format!("test {} has no name", i + 1)));
            }
            if plan.steps.is_empty() {
                return Err(GenerationError::InvalidPlan(format!(
                    "test '{}' has no steps",
                    plan.name
                )));
            }
            Ok(plan)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_fenced_plan_with_defaults() {
        let raw = "```json\n[{\"name\": \"Signup\", \"steps\": [\
            {\"action\": \"goto\", \"path\": \"/signup\"},\
            {\"action\": \"fill\", \"field\": \"Age\", \"value\": 42},\
            {\"action\": \"wait\"},\
            {\"action\": \"assert_page_has_text\"},\
            {\"action\": \"assert_element_count\", \"selector\": \".row\"}]}]\n```";
        let plans = parse_plan(raw).unwrap();
        assert_eq!(plans.len(), 1);
        let steps = &plans[0].steps;
        assert_eq!(
            steps[1],
            Step::Fill {
                field: "Age".into(),
                value: "42".into()
            }
        );
        assert_eq!(steps[2], Step::Wait { seconds: 2.0 });
        assert_eq!(
            steps[3],
            Step::AssertPageHasText {
                pattern: DEFAULT_SUCCESS_PATTERN.into()
            }
        );
        assert_eq!(
            steps[4],
            Step::AssertElementCount {
                selector: ".row".into(),
                min: 1
            }
        );
    }

    #[test]
    fn test_rejections_are_typed() {
        assert!(matches!(
            parse_plan("Sure! Here are your tests"),
            Err(GenerationError::MalformedResponse(_))
        ));
        assert!(matches!(parse_plan("[]"), Err(GenerationError::EmptyPlan)));
        assert!(matches!(parse_plan("{\"name\": \"x\"}"), Err(GenerationError::EmptyPlan)));
        assert!(matches!(
            parse_plan(r#"[{"name": "x", "steps": [{"action": "hover", "text": "Menu"}]}]"#),
            Err(GenerationError::InvalidPlan(_))
        ));
        assert!(matches!(
            parse_plan(r#"[{"name": "x", "steps": []}]"#),
            Err(GenerationError::InvalidPlan(_))
        ));
        assert!(matches!(
            parse_plan(r#"[{"name": " ", "steps": [{"action": "assert_url_changed"}]}]"#),
            Err(GenerationError::InvalidPlan(_))
        ));
    }

    #[test]
    fn test_assertion_classification() {
        assert!(Step::AssertUrlChanged.is_assertion());
        assert!(!Step::ClickButton { text: "Go".into() }.is_assertion());
        assert!(
            Step::ApiGet {
                path: "/api".into(),
                assert_status: Some(200)
            }
            .is_assertion()
        );
        assert!(
            !Step::ApiGet {
                path: "/api".into(),
                assert_status: None
            }
            .is_assertion()
        );
    }

    #[test]
    fn test_api_only_detection() {
        let plan: TestPlan = serde_json::from_str(
            r#"{"name": "api", "steps": [{"action": "api_get", "path": "/api/users", "assert_status": 200},
                {"action": "api_post", "path": "/api/login"}]}"#,
        )
        .unwrap();
        assert!(plan.is_api_only());
        if let Step::ApiPost { body, .. } = &plan.steps[1] {
            assert_eq!(body, &serde_json::json!({}));
        } else {
            panic!("expected api_post");
        }
    }
}
