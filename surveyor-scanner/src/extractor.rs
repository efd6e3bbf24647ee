//! UI-element snapshots: a bounded, deduplicated summary of the interactive
//! and semantic elements on a page, used later as test-generation context.

use crate::browser::BrowserPage;
use crate::dom::{self, selector};
use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Persisted shape: `{buttons, inputs, links, headings, selects}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiSnapshot {
    pub buttons: Vec<String>,
    pub inputs: Vec<InputDescriptor>,
    pub links: Vec<String>,
    pub headings: Vec<String>,
    pub selects: Vec<SelectDescriptor>,
}

impl UiSnapshot {
    pub fn is_empty(&self) -> bool {
        self.buttons.is_empty()
            && self.inputs.is_empty()
            && self.links.is_empty()
            && self.headings.is_empty()
            && self.selects.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputDescriptor {
    #[serde(rename = "type")]
    pub input_type: String,
    pub placeholder: String,
    pub label: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectDescriptor {
    pub label: String,
    pub options: Vec<String>,
}

/// Caps and filters applied during extraction. The caps bound both storage
/// and the size of the prompt built from snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionPolicy {
    /// Drop elements hidden by markup (or by layout, for live drivers).
    pub visible_only: bool,
    pub max_buttons: usize,
    pub max_inputs: usize,
    pub max_links: usize,
    pub max_headings: usize,
    /// Deepest heading level collected (`3` → h1..h3).
    pub heading_depth: u8,
    pub max_selects: usize,
    pub max_options: usize,
    pub label_len: usize,
}

impl ExtractionPolicy {
    /// Used on every page during the BFS crawl.
    pub fn crawl() -> Self {
        Self {
            visible_only: false,
            max_buttons: 20,
            max_inputs: 20,
            max_links: 20,
            max_headings: 10,
            heading_depth: 3,
            max_selects: 10,
            max_options: 8,
            label_len: 60,
        }
    }

    /// Used when scouting a live site right before AI generation.
    pub fn scouting() -> Self {
        Self {
            visible_only: true,
            max_buttons: 25,
            max_inputs: 25,
            max_links: 25,
            max_headings: 15,
            heading_depth: 4,
            max_selects: 10,
            max_options: 10,
            label_len: 60,
        }
    }
}

impl Default for ExtractionPolicy {
    fn default() -> Self {
        Self::crawl()
    }
}

/// Order-preserving dedup that also drops empty strings.
fn unique(items: impl Iterator<Item = String>, cap: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.clone()))
        .take(cap)
        .collect()
}

/// Extract a snapshot from serialized HTML.
pub fn extract_ui(html: &str, policy: &ExtractionPolicy) -> UiSnapshot {
    let doc = Html::parse_document(html);
    let eligible = |el: &ElementRef<'_>| !policy.visible_only || !dom::is_hidden(*el);
    let max = policy.label_len;

    let buttons = unique(
        doc.select(&selector("button, input[type=\"submit\"], [role=\"button\"]"))
            .filter(eligible)
            .map(|el| {
                let text = dom::text_of(el);
                let label = if !text.is_empty() {
                    text
                } else {
                    el.value()
                        .attr("value")
                        .or_else(|| el.value().attr("aria-label"))
                        .unwrap_or_default()
                        .trim()
                        .to_string()
                };
                dom::truncate(&label, max)
            }),
        policy.max_buttons,
    );

    let inputs = doc
        .select(&selector(
            "input[type=\"text\"], input[type=\"email\"], input[type=\"password\"], \
             input[type=\"tel\"], input[type=\"number\"], input[type=\"search\"], \
             input[type=\"url\"], input:not([type]), textarea",
        ))
        .filter(eligible)
        .map(|el| InputDescriptor {
            input_type: dom::control_type(el),
            placeholder: el.value().attr("placeholder").unwrap_or_default().to_string(),
            label: dom::truncate(&dom::input_label(&doc, el), max),
            name: el.value().attr("name").unwrap_or_default().to_string(),
        })
        .take(policy.max_inputs)
        .collect();

    let links = unique(
        doc.select(&selector("a[href]"))
            .filter(eligible)
            .map(dom::text_of)
            .filter(|t| {
                let len = t.chars().count();
                len > 1 && len < max
            }),
        policy.max_links,
    );

    let heading_css = (1..=policy.heading_depth.clamp(1, 6))
        .map(|level| format!("h{}", level))
        .collect::<Vec<_>>()
        .join(", ");
    let headings = unique(
        doc.select(&selector(&heading_css))
            .map(|el| dom::truncate(&dom::text_of(el), 80))
            .filter(|t| t.chars().count() > 1),
        policy.max_headings,
    );

    let option_sel = selector("option");
    let selects = doc
        .select(&selector("select"))
        .filter(eligible)
        .map(|el| SelectDescriptor {
            label: dom::truncate(&dom::select_label(&doc, el), max),
            options: el
                .select(&option_sel)
                .map(dom::text_of)
                .take(policy.max_options)
                .collect(),
        })
        .take(policy.max_selects)
        .collect();

    UiSnapshot {
        buttons,
        inputs,
        links,
        headings,
        selects,
    }
}

/// Snapshot the page currently loaded in `page`. Never fails: any driver
/// error degrades to an empty snapshot.
pub async fn capture_ui(page: &dyn BrowserPage, policy: &ExtractionPolicy) -> UiSnapshot {
    match page.content().await {
        Ok(html) => extract_ui(&html, policy),
        Err(e) => {
            debug!("UI extraction failed, using empty snapshot: {}", e);
            UiSnapshot::default()
        }
    }
}
