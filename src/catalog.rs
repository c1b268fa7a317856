//! Server-curated element catalog and its per-turn lookup index.
//!
//! The catalog arrives as JSON from the automation server once per turn. The
//! lookup is built fresh for each optimization call and never shared across
//! calls; malformed or missing input degrades to an empty, non-failing
//! lookup.

use crate::normalize::normalize;
use crate::resolver::score::{
    role_bonus, score_candidate, AffinityClass, CATALOG_WEIGHTS,
};
use crate::resolver::selector::{role_selector_name, SelectorScheme};
use crate::resolver::{IndexResolution, ResolutionSource};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Selector matches are treated as definitive; they short-circuit all further
/// resolution attempts.
pub const SELECTOR_CONFIDENCE: f64 = 2.5;

/// One interactive element as curated by the automation server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub index: i64,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub primary_label: Option<String>,
    #[serde(default)]
    pub secondary_label: Option<String>,
    #[serde(default)]
    pub section_hint: Option<String>,
    #[serde(default)]
    pub state_hint: Option<String>,
    #[serde(default)]
    pub href_short: Option<String>,
    #[serde(default)]
    pub robust_selectors: Vec<String>,
    #[serde(default)]
    pub nearest_texts: Vec<String>,
}

/// Versioned element catalog, read-only per turn. Index values are unique
/// within one version; the version token must travel with the batch to
/// dispatch so the server can reject stale catalogs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElementCatalog {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub full: Vec<CatalogEntry>,
}

/// Catalog index: selector table plus per-entry candidate texts, built once
/// per optimization call.
pub struct CatalogLookup {
    entries: Vec<CatalogEntry>,
    version: Option<String>,
    /// Selector string → element index, keyed in original case and lowercase.
    selectors: HashMap<String, i64>,
}

impl CatalogLookup {
    /// Build from a raw JSON catalog value. `None` or a malformed shape
    /// yields an empty lookup; this is best-effort by design.
    pub fn from_value(raw: Option<&Value>) -> Self {
        let catalog = match raw {
            Some(value) => match serde_json::from_value::<ElementCatalog>(value.clone()) {
                Ok(catalog) => catalog,
                Err(err) => {
                    tracing::warn!(error = %err, "malformed element catalog, using empty lookup");
                    ElementCatalog::default()
                }
            },
            None => ElementCatalog::default(),
        };
        Self::new(catalog)
    }

    pub fn new(catalog: ElementCatalog) -> Self {
        let mut selectors = HashMap::new();
        for entry in &catalog.full {
            for sel in &entry.robust_selectors {
                let sel = sel.trim();
                if sel.is_empty() {
                    continue;
                }
                selectors.entry(sel.to_string()).or_insert(entry.index);
                selectors
                    .entry(sel.to_lowercase())
                    .or_insert(entry.index);
            }
        }
        Self {
            entries: catalog.full,
            version: catalog.version,
            selectors,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Catalog version token, forwarded to dispatch for staleness rejection.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Exact or case-insensitive exact selector match.
    pub fn match_selector(&self, selector: &str) -> Option<IndexResolution> {
        let trimmed = selector.trim();
        if trimmed.is_empty() {
            return None;
        }
        let index = self
            .selectors
            .get(trimmed)
            .or_else(|| self.selectors.get(&trimmed.to_lowercase()))?;
        Some(IndexResolution {
            index: *index,
            source: ResolutionSource::CatalogSelector,
            matched: trimmed.to_string(),
            confidence: SELECTOR_CONFIDENCE,
        })
    }

    /// Fuzzy text match over every entry's candidate texts. Rejects weak best
    /// scores and ambiguous top-two margins; a wrong match is worse than no
    /// match.
    pub fn match_text(&self, text: &str, class: AffinityClass) -> Option<IndexResolution> {
        let query = normalize(text);
        if query.is_empty() {
            return None;
        }

        let mut best: Option<(f64, i64, String)> = None;
        let mut runner_up = 0.0_f64;
        for entry in &self.entries {
            let bonus = role_bonus(&entry.role, &entry.tag, class);
            let mut entry_best: Option<(f64, String)> = None;
            for candidate in candidate_texts(entry) {
                let cand_norm = normalize(&candidate);
                if cand_norm.is_empty() {
                    continue;
                }
                let score = score_candidate(&query, &cand_norm, &CATALOG_WEIGHTS) + bonus;
                if entry_best.as_ref().is_none_or(|(s, _)| score > *s) {
                    entry_best = Some((score, candidate));
                }
            }
            let Some((score, candidate)) = entry_best else {
                continue;
            };
            match &best {
                Some((best_score, _, _)) if score <= *best_score => {
                    runner_up = runner_up.max(score);
                }
                _ => {
                    if let Some((prev, _, _)) = best {
                        runner_up = runner_up.max(prev);
                    }
                    best = Some((score, entry.index, candidate));
                }
            }
        }

        let (score, index, matched) = best?;
        if score < CATALOG_WEIGHTS.min_best || score - runner_up < CATALOG_WEIGHTS.min_margin {
            tracing::debug!(
                query = %query,
                score,
                runner_up,
                "catalog text match rejected (weak or ambiguous)"
            );
            return None;
        }
        Some(IndexResolution {
            index,
            source: ResolutionSource::CatalogText,
            matched,
            confidence: score,
        })
    }
}

/// Searchable texts for one entry: label fields, nearby texts, and names
/// mined from `text=` / `role=...[name=...]` selectors.
fn candidate_texts(entry: &CatalogEntry) -> Vec<String> {
    let mut out = Vec::new();
    let mut push = |text: &str| {
        let text = text.trim();
        if !text.is_empty() && !out.iter().any(|t: &String| t == text) {
            out.push(text.to_string());
        }
    };
    if let Some(label) = &entry.primary_label {
        push(label);
    }
    if let Some(label) = &entry.secondary_label {
        push(label);
    }
    for text in &entry.nearest_texts {
        push(text);
    }
    for sel in &entry.robust_selectors {
        match SelectorScheme::parse(sel) {
            Some((SelectorScheme::Text, payload)) => push(payload),
            Some((SelectorScheme::Role, payload)) => {
                if let Some(name) = role_selector_name(payload) {
                    push(name);
                }
            }
            _ => {}
        }
    }
    out
}
