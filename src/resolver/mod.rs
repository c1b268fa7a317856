//! Target resolution: mapping an ambiguous, LLM-authored target reference to
//! one definite element index.
//!
//! Attempts run in a fixed order and the first success wins:
//! existing index → catalog selector → catalog text → DOM text. A target that
//! cannot be resolved with confidence is left alone by the caller; resolution
//! never guesses between near-equal candidates.

pub mod score;
pub mod selector;

use crate::catalog::CatalogLookup;
use crate::dom::DomLookup;
use score::AffinityClass;
use selector::SelectorScheme;
use serde_json::Value;

/// Confidence assigned to a target that already carries an index. Resolved
/// targets are never second-guessed, so this outranks every lookup source.
pub const EXISTING_CONFIDENCE: f64 = 3.0;

/// Where a resolution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Existing,
    CatalogSelector,
    CatalogText,
    DomText,
}

impl ResolutionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionSource::Existing => "existing",
            ResolutionSource::CatalogSelector => "catalog_selector",
            ResolutionSource::CatalogText => "catalog_text",
            ResolutionSource::DomText => "dom_text",
        }
    }
}

/// A resolved element index with provenance. Transient: produced per call,
/// never persisted. `confidence` is only comparable to other candidates from
/// the same call.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexResolution {
    pub index: i64,
    pub source: ResolutionSource,
    pub matched: String,
    pub confidence: f64,
}

/// Resolve a raw target value against the catalog and DOM lookups.
///
/// `value` can be an index map, a prefixed selector string, free text, or a
/// nested list/map combination of those; `class` is the acting action's
/// semantic affinity used for tie-breaking.
pub fn resolve(
    value: &Value,
    class: AffinityClass,
    catalog: &CatalogLookup,
    dom: &DomLookup,
) -> Option<IndexResolution> {
    if let Some(index) = existing_index(value) {
        return Some(IndexResolution {
            index,
            source: ResolutionSource::Existing,
            matched: format!("index={index}"),
            confidence: EXISTING_CONFIDENCE,
        });
    }

    for sel in selector_strings(value) {
        if let Some(hit) = catalog.match_selector(&sel) {
            tracing::debug!(selector = %sel, index = hit.index, "target resolved via catalog selector");
            return Some(hit);
        }
    }

    for text in free_texts(value) {
        if let Some(hit) = catalog.match_text(&text, class) {
            tracing::debug!(text = %text, index = hit.index, "target resolved via catalog text");
            return Some(hit);
        }
        if let Some(hit) = dom.match_text(&text, class) {
            tracing::debug!(text = %text, index = hit.index, "target resolved via DOM text");
            return Some(hit);
        }
    }

    None
}

/// Keys that may nest a target reference inside a map.
const NESTING_KEYS: [&str; 3] = ["selector", "target", "value"];

/// Extract an already-assigned index: `{index: N}` directly or nested under a
/// known key, inside a list, or encoded as an `index=N` string.
pub fn existing_index(value: &Value) -> Option<i64> {
    match value {
        Value::Object(map) => {
            if let Some(n) = map.get("index").and_then(int_of) {
                return Some(n);
            }
            NESTING_KEYS
                .iter()
                .filter_map(|key| map.get(*key))
                .find_map(existing_index)
        }
        Value::Array(items) => items.iter().find_map(existing_index),
        Value::String(raw) => match SelectorScheme::parse(raw) {
            Some((SelectorScheme::Index, payload)) => payload.trim().parse().ok(),
            _ => None,
        },
        _ => None,
    }
}

fn int_of(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Collect every selector-scheme string reachable in the value, synthesizing
/// selectors from structured `{css: ...}` / `{xpath: ...}` / `{role, name}`
/// maps. `text=` strings are excluded here; their payload is free text.
pub fn selector_strings(value: &Value) -> Vec<String> {
    let mut out = Vec::new();
    collect_selectors(value, &mut out);
    out
}

fn collect_selectors(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(raw) => {
            if let Some((scheme, _)) = SelectorScheme::parse(raw) {
                if scheme != SelectorScheme::Text {
                    out.push(raw.trim().to_string());
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_selectors(item, out);
            }
        }
        Value::Object(map) => {
            if let Some(css) = map.get("css").and_then(Value::as_str) {
                out.push(format!("css={css}"));
            }
            if let Some(xpath) = map.get("xpath").and_then(Value::as_str) {
                out.push(format!("xpath={xpath}"));
            }
            if let Some(role) = map.get("role").and_then(Value::as_str) {
                match map.get("name").and_then(Value::as_str) {
                    Some(name) => out.push(format!("role={role}[name=\"{name}\"]")),
                    None => out.push(format!("role={role}")),
                }
            }
            for key in NESTING_KEYS {
                if let Some(nested) = map.get(key) {
                    collect_selectors(nested, out);
                }
            }
        }
        _ => {}
    }
}

/// Collect every free-text string reachable in the value. Strings with a
/// recognized selector scheme are skipped, except `text=` whose payload is
/// included.
pub fn free_texts(value: &Value) -> Vec<String> {
    let mut out = Vec::new();
    collect_free_texts(value, &mut out);
    out
}

fn collect_free_texts(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(raw) => match SelectorScheme::parse(raw) {
            Some((SelectorScheme::Text, payload)) => {
                let payload = payload.trim();
                if !payload.is_empty() {
                    out.push(payload.to_string());
                }
            }
            Some(_) => {}
            None => {
                let trimmed = raw.trim();
                if !trimmed.is_empty() {
                    out.push(trimmed.to_string());
                }
            }
        },
        Value::Array(items) => {
            for item in items {
                collect_free_texts(item, out);
            }
        }
        Value::Object(map) => {
            for key in ["text", "selector", "target", "value"] {
                if let Some(nested) = map.get(key) {
                    collect_free_texts(nested, out);
                }
            }
        }
        _ => {}
    }
}
