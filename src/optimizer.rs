//! Action batch optimization: rewriting ambiguous LLM-authored targets to
//! resolved element indices.
//!
//! The optimizer is best-effort by contract. It never mutates its input,
//! never fails an action it cannot resolve, and emits one human-readable
//! audit note per rewrite. With neither a catalog nor a DOM index available
//! it degrades to a pure copy.

use crate::catalog::CatalogLookup;
use crate::dom::DomLookup;
use crate::resolver::score::AffinityClass;
use crate::resolver::{self, IndexResolution};
use serde_json::{json, Map, Value};

/// Known DSL action kinds. The list is closed; adding a kind means adding a
/// variant and handling it in the exhaustive dispatch below. Unknown kinds
/// pass through the optimizer untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Click,
    ClickText,
    Hover,
    Type,
    SelectOption,
    ExtractText,
    WaitForSelector,
    Scroll,
    Assert,
    Wait,
    Search,
    SubmitForm,
}

impl ActionKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "click" => Some(Self::Click),
            "click_text" => Some(Self::ClickText),
            "hover" => Some(Self::Hover),
            "type" => Some(Self::Type),
            "select_option" => Some(Self::SelectOption),
            "extract_text" => Some(Self::ExtractText),
            "wait_for_selector" => Some(Self::WaitForSelector),
            "scroll" => Some(Self::Scroll),
            "assert" => Some(Self::Assert),
            "wait" => Some(Self::Wait),
            "search" => Some(Self::Search),
            "submit_form" => Some(Self::SubmitForm),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::ClickText => "click_text",
            Self::Hover => "hover",
            Self::Type => "type",
            Self::SelectOption => "select_option",
            Self::ExtractText => "extract_text",
            Self::WaitForSelector => "wait_for_selector",
            Self::Scroll => "scroll",
            Self::Assert => "assert",
            Self::Wait => "wait",
            Self::Search => "search",
            Self::SubmitForm => "submit_form",
        }
    }

    /// Semantic target class used for same-text tie-breaking.
    pub fn affinity(self) -> AffinityClass {
        match self {
            Self::Click | Self::ClickText | Self::Hover | Self::ExtractText => {
                AffinityClass::Pointer
            }
            Self::Type | Self::Search | Self::SubmitForm => AffinityClass::TextEntry,
            Self::SelectOption => AffinityClass::OptionPick,
            Self::WaitForSelector | Self::Scroll | Self::Assert | Self::Wait => {
                AffinityClass::Neutral
            }
        }
    }
}

/// Per-call optimizer over one catalog and one DOM snapshot. Lookups are
/// built once at construction and never shared across calls.
pub struct ActionOptimizer {
    catalog: CatalogLookup,
    dom: DomLookup,
}

impl ActionOptimizer {
    pub fn new(catalog: Option<&Value>, dom: Option<&Value>) -> Self {
        Self {
            catalog: CatalogLookup::from_value(catalog),
            dom: DomLookup::from_value(dom),
        }
    }

    /// Version token of the catalog in use, to be forwarded to dispatch.
    pub fn catalog_version(&self) -> Option<&str> {
        self.catalog.version()
    }

    /// Rewrite a batch of actions to reference resolved indices.
    ///
    /// Returns the rewritten batch (always a fresh value, input untouched)
    /// and the audit notes accumulated in processing order.
    pub fn optimize(&self, actions: &[Value]) -> (Vec<Value>, Vec<String>) {
        if self.catalog.is_empty() && self.dom.is_empty() {
            return (actions.to_vec(), Vec::new());
        }
        let mut notes = Vec::new();
        let optimized = actions
            .iter()
            .map(|action| self.optimize_one(action, &mut notes))
            .collect();
        tracing::debug!(
            actions = actions.len(),
            rewrites = notes.len(),
            "action batch optimized"
        );
        (optimized, notes)
    }

    fn optimize_one(&self, raw: &Value, notes: &mut Vec<String>) -> Value {
        let Some(source) = raw.as_object() else {
            return raw.clone();
        };
        let Some(kind) = source
            .get("action")
            .and_then(Value::as_str)
            .and_then(ActionKind::parse)
        else {
            return raw.clone();
        };

        let mut map = source.clone();
        match kind {
            ActionKind::ClickText => self.rewrite_click_text(&mut map, notes),
            ActionKind::Click
            | ActionKind::Hover
            | ActionKind::Type
            | ActionKind::SelectOption
            | ActionKind::ExtractText
            | ActionKind::WaitForSelector
            | ActionKind::Scroll
            | ActionKind::Assert => {
                self.resolve_field(&mut map, kind, "target", notes);
            }
            ActionKind::Wait => {
                if is_selector_wait(&map) {
                    self.resolve_field(&mut map, kind, "target", notes);
                    self.resolve_field(&mut map, kind, "value", notes);
                }
            }
            ActionKind::Search => {
                self.resolve_field(&mut map, kind, "input", notes);
                self.resolve_field(&mut map, kind, "submit_selector", notes);
            }
            ActionKind::SubmitForm => {
                self.rewrite_submit_form(&mut map, notes);
            }
        }
        Value::Object(map)
    }

    /// `click_text` resolves its `text` (fallback `target`); success rewrites
    /// the action kind itself to `click`. Failure keeps `click_text` but
    /// backfills `target` from the text so dispatch still has something.
    fn rewrite_click_text(&self, map: &mut Map<String, Value>, notes: &mut Vec<String>) {
        let probe = map
            .get("text")
            .cloned()
            .or_else(|| map.get("target").cloned());
        let Some(probe) = probe else {
            return;
        };
        match self.resolve(&probe, AffinityClass::Pointer) {
            Some(resolution) => {
                map.insert("action".into(), json!("click"));
                map.remove("text");
                map.insert("target".into(), json!({ "index": resolution.index }));
                notes.push(render_note(
                    ActionKind::ClickText.as_str(),
                    "text",
                    &resolution,
                    &probe,
                ));
            }
            None => {
                if !map.contains_key("target") {
                    if let Some(text) = map.get("text").cloned() {
                        map.insert("target".into(), text);
                    }
                }
            }
        }
    }

    fn rewrite_submit_form(&self, map: &mut Map<String, Value>, notes: &mut Vec<String>) {
        match map.remove("fields") {
            Some(Value::Array(fields)) => {
                let resolved = self.rewrite_form_fields(fields, notes);
                map.insert("fields".into(), Value::Array(resolved));
            }
            Some(other) => {
                // Malformed fields value is left exactly as it came in.
                map.insert("fields".into(), other);
            }
            None => {}
        }
        self.resolve_field(map, ActionKind::SubmitForm, "submit_selector", notes);
    }

    fn rewrite_form_fields(
        &self,
        mut fields: Vec<Value>,
        notes: &mut Vec<String>,
    ) -> Vec<Value> {
        for (position, field) in fields.iter_mut().enumerate() {
            let Some(entry) = field.as_object_mut() else {
                continue;
            };
            let Some(original) = entry.get("selector").cloned() else {
                continue;
            };
            let Some(resolution) = self.resolve(&original, ActionKind::SubmitForm.affinity())
            else {
                continue;
            };
            if !already_resolved(&original, &resolution) {
                entry.insert("selector".into(), json!({ "index": resolution.index }));
            }
            notes.push(render_note(
                ActionKind::SubmitForm.as_str(),
                &format!("fields[{position}].selector"),
                &resolution,
                &original,
            ));
        }
        fields
    }

    /// Resolve one field in place; absence and resolution misses are no-ops.
    fn resolve_field(
        &self,
        map: &mut Map<String, Value>,
        kind: ActionKind,
        field: &str,
        notes: &mut Vec<String>,
    ) {
        let Some(original) = map.get(field).cloned() else {
            return;
        };
        let Some(resolution) = self.resolve(&original, kind.affinity()) else {
            return;
        };
        // An input already shaped {index: N} is kept verbatim rather than
        // re-wrapped.
        if !already_resolved(&original, &resolution) {
            map.insert(field.to_string(), json!({ "index": resolution.index }));
        }
        notes.push(render_note(kind.as_str(), field, &resolution, &original));
    }

    fn resolve(&self, value: &Value, class: AffinityClass) -> Option<IndexResolution> {
        resolver::resolve(value, class, &self.catalog, &self.dom)
    }
}

/// Convenience wrapper: build the lookups, optimize one batch.
pub fn optimize_actions(
    actions: &[Value],
    catalog: Option<&Value>,
    dom: Option<&Value>,
) -> (Vec<Value>, Vec<String>) {
    ActionOptimizer::new(catalog, dom).optimize(actions)
}

/// A `wait` only resolves targets when it explicitly waits on a selector.
fn is_selector_wait(map: &Map<String, Value>) -> bool {
    ["until", "for"].iter().any(|key| {
        map.get(*key)
            .and_then(Value::as_str)
            .is_some_and(|v| v.eq_ignore_ascii_case("selector"))
    })
}

fn already_resolved(original: &Value, resolution: &IndexResolution) -> bool {
    original
        .as_object()
        .is_some_and(|map| map.len() == 1 && map.get("index").and_then(Value::as_i64) == Some(resolution.index))
}

fn render_note(action: &str, field: &str, resolution: &IndexResolution, original: &Value) -> String {
    let serialized = serde_json::to_string(original).unwrap_or_else(|_| original.to_string());
    format!(
        "{action}.{field} -> index={index} ({source}:{matched}) from {serialized}",
        index = resolution.index,
        source = resolution.source.as_str(),
        matched = resolution.matched,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog() -> Value {
        json!({
            "version": "cat-1",
            "full": [
                {"index": 3, "role": "button", "tag": "button",
                 "primary_label": "Checkout",
                 "robust_selectors": ["css=#checkout", "role=button[name=\"Checkout\"]"]},
                {"index": 5, "role": "textbox", "tag": "input",
                 "primary_label": "Search products",
                 "robust_selectors": ["css=#search-box"]},
            ],
        })
    }

    #[test]
    fn unknown_action_kinds_pass_through() {
        let optimizer = ActionOptimizer::new(Some(&catalog()), None);
        let batch = vec![json!({"action": "teleport", "target": "Checkout"})];
        let (out, notes) = optimizer.optimize(&batch);
        assert_eq!(out, batch);
        assert!(notes.is_empty());
    }

    #[test]
    fn non_object_entries_pass_through() {
        let optimizer = ActionOptimizer::new(Some(&catalog()), None);
        let batch = vec![json!("noise"), json!(17)];
        let (out, notes) = optimizer.optimize(&batch);
        assert_eq!(out, batch);
        assert!(notes.is_empty());
    }

    #[test]
    fn click_target_rewritten_from_selector() {
        let optimizer = ActionOptimizer::new(Some(&catalog()), None);
        let batch = vec![json!({"action": "click", "target": "css=#checkout"})];
        let (out, notes) = optimizer.optimize(&batch);
        assert_eq!(out[0]["target"], json!({"index": 3}));
        assert_eq!(notes.len(), 1);
        assert!(notes[0].starts_with("click.target -> index=3 (catalog_selector:"));
        assert!(notes[0].contains("from \"css=#checkout\""));
    }

    #[test]
    fn search_resolves_both_fields_independently() {
        let optimizer = ActionOptimizer::new(Some(&catalog()), None);
        let batch = vec![json!({
            "action": "search",
            "input": "css=#search-box",
            "submit_selector": "css=#checkout",
            "query": "boots",
        })];
        let (out, notes) = optimizer.optimize(&batch);
        assert_eq!(out[0]["input"], json!({"index": 5}));
        assert_eq!(out[0]["submit_selector"], json!({"index": 3}));
        assert_eq!(out[0]["query"], json!("boots"));
        assert_eq!(notes.len(), 2);
    }

    #[test]
    fn submit_form_resolves_field_entries() {
        let optimizer = ActionOptimizer::new(Some(&catalog()), None);
        let batch = vec![json!({
            "action": "submit_form",
            "fields": [
                {"selector": "css=#search-box", "value": "boots"},
                {"selector": "css=#unknown", "value": "kept"},
            ],
            "submit_selector": "css=#checkout",
        })];
        let (out, notes) = optimizer.optimize(&batch);
        assert_eq!(out[0]["fields"][0]["selector"], json!({"index": 5}));
        assert_eq!(out[0]["fields"][0]["value"], json!("boots"));
        // Unresolvable entry keeps its original selector.
        assert_eq!(out[0]["fields"][1]["selector"], json!("css=#unknown"));
        assert_eq!(out[0]["submit_selector"], json!({"index": 3}));
        assert_eq!(notes.len(), 2);
        assert!(notes[0].starts_with("submit_form.fields[0].selector -> index=5"));
    }

    #[test]
    fn wait_only_resolves_selector_waits() {
        let optimizer = ActionOptimizer::new(Some(&catalog()), None);
        let plain = vec![json!({"action": "wait", "target": "css=#checkout", "seconds": 2})];
        let (out, notes) = optimizer.optimize(&plain);
        assert_eq!(out[0]["target"], json!("css=#checkout"));
        assert!(notes.is_empty());

        let gated = vec![json!({
            "action": "wait", "until": "selector", "target": "css=#checkout",
        })];
        let (out, notes) = optimizer.optimize(&gated);
        assert_eq!(out[0]["target"], json!({"index": 3}));
        assert_eq!(notes.len(), 1);
    }

    #[test]
    fn click_text_failure_backfills_target() {
        let optimizer = ActionOptimizer::new(Some(&catalog()), None);
        let batch = vec![json!({"action": "click_text", "text": "no such element"})];
        let (out, notes) = optimizer.optimize(&batch);
        assert_eq!(out[0]["action"], json!("click_text"));
        assert_eq!(out[0]["target"], json!("no such element"));
        assert!(notes.is_empty());
    }

    #[test]
    fn catalog_version_is_surfaced() {
        let optimizer = ActionOptimizer::new(Some(&catalog()), None);
        assert_eq!(optimizer.catalog_version(), Some("cat-1"));
    }
}
