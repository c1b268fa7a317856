//! Client-side DOM snapshot and its per-turn lookup index.
//!
//! The snapshot is a tree captured by an external collaborator; nodes with a
//! `highlightIndex` are interactive. The lookup walks the tree once per
//! optimization call, aggregates searchable text per interactive node, and
//! keeps an inverse index for exact hits. The tree is never mutated.

use crate::normalize::normalize;
use crate::resolver::score::{role_bonus, score_candidate, AffinityClass, DOM_WEIGHTS};
use crate::resolver::{IndexResolution, ResolutionSource};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// Confidence for an unambiguous exact inverse-index hit. Below a catalog
/// selector match, above anything fuzzy.
pub const DOM_EXACT_CONFIDENCE: f64 = 2.3;

/// Attribute names whose values are searchable, in aggregation order.
const TEXT_ATTRIBUTES: [&str; 7] = [
    "aria-label",
    "placeholder",
    "alt",
    "title",
    "value",
    "name",
    "id",
];

/// One node of the captured DOM snapshot tree.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DomSnapshotNode {
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub children: Vec<DomSnapshotNode>,
    #[serde(default, rename = "highlightIndex")]
    pub highlight_index: Option<i64>,
    #[serde(default)]
    pub annotations: Vec<String>,
}

impl DomSnapshotNode {
    fn attr(&self, name: &str) -> Option<String> {
        match self.attributes.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// Flattened view of one interactive node.
#[derive(Debug, Clone)]
pub struct DomNodeInfo {
    pub index: i64,
    pub tag: String,
    pub role: String,
    pub texts: Vec<String>,
}

/// DOM-side lookup: interactive nodes plus a normalized-text inverse index.
pub struct DomLookup {
    nodes: Vec<DomNodeInfo>,
    /// normalized text → indices of nodes carrying it
    exact: HashMap<String, Vec<i64>>,
}

impl DomLookup {
    /// Build from a raw JSON snapshot: a single root object or a list of
    /// roots. Malformed input degrades to an empty lookup.
    pub fn from_value(raw: Option<&Value>) -> Self {
        let roots: Vec<DomSnapshotNode> = match raw {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match serde_json::from_value(item.clone()) {
                    Ok(node) => Some(node),
                    Err(err) => {
                        tracing::warn!(error = %err, "skipping malformed DOM root");
                        None
                    }
                })
                .collect(),
            Some(value) => match serde_json::from_value(value.clone()) {
                Ok(node) => vec![node],
                Err(err) => {
                    tracing::warn!(error = %err, "malformed DOM snapshot, using empty lookup");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        Self::new(&roots)
    }

    /// Build from already-typed snapshot roots. Borrows only; the caller
    /// keeps ownership of the tree.
    pub fn new(roots: &[DomSnapshotNode]) -> Self {
        let mut nodes = Vec::new();
        for root in roots {
            collect_interactive(root, &mut nodes);
        }
        let mut exact: HashMap<String, Vec<i64>> = HashMap::new();
        for node in &nodes {
            for text in &node.texts {
                let key = normalize(text);
                if key.is_empty() {
                    continue;
                }
                let indices = exact.entry(key).or_default();
                if !indices.contains(&node.index) {
                    indices.push(node.index);
                }
            }
        }
        Self { nodes, exact }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Fuzzy text match over interactive nodes. A unique exact inverse-index
    /// hit short-circuits scoring entirely; otherwise the same scoring as the
    /// catalog applies with looser thresholds and lower weights.
    pub fn match_text(&self, text: &str, class: AffinityClass) -> Option<IndexResolution> {
        let query = normalize(text);
        if query.is_empty() {
            return None;
        }

        if let Some(indices) = self.exact.get(&query) {
            if indices.len() == 1 {
                return Some(IndexResolution {
                    index: indices[0],
                    source: ResolutionSource::DomText,
                    matched: query,
                    confidence: DOM_EXACT_CONFIDENCE,
                });
            }
        }

        let mut best: Option<(f64, i64, String)> = None;
        let mut runner_up = 0.0_f64;
        for node in &self.nodes {
            let bonus = role_bonus(&node.role, &node.tag, class);
            let mut node_best: Option<(f64, String)> = None;
            for candidate in &node.texts {
                let cand_norm = normalize(candidate);
                if cand_norm.is_empty() {
                    continue;
                }
                let score = score_candidate(&query, &cand_norm, &DOM_WEIGHTS) + bonus;
                if node_best.as_ref().is_none_or(|(s, _)| score > *s) {
                    node_best = Some((score, candidate.clone()));
                }
            }
            let Some((score, candidate)) = node_best else {
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
                    best = Some((score, node.index, candidate));
                }
            }
        }

        let (score, index, matched) = best?;
        if score < DOM_WEIGHTS.min_best || score - runner_up < DOM_WEIGHTS.min_margin {
            tracing::debug!(
                query = %query,
                score,
                runner_up,
                "DOM text match rejected (weak or ambiguous)"
            );
            return None;
        }
        Some(IndexResolution {
            index,
            source: ResolutionSource::DomText,
            matched,
            confidence: score,
        })
    }
}

fn collect_interactive(node: &DomSnapshotNode, out: &mut Vec<DomNodeInfo>) {
    if let Some(index) = node.highlight_index {
        out.push(DomNodeInfo {
            index,
            tag: node.tag.to_lowercase(),
            role: node.attr("role").unwrap_or_default().to_lowercase(),
            texts: searchable_texts(node),
        });
    }
    for child in &node.children {
        collect_interactive(child, out);
    }
}

/// Aggregate a node's searchable texts: own/descendant text first, then the
/// labeling attributes, then annotations. Duplicates are dropped.
fn searchable_texts(node: &DomSnapshotNode) -> Vec<String> {
    let mut out = Vec::new();
    let mut push = |text: String| {
        let text = text.trim().to_string();
        if !text.is_empty() && !out.contains(&text) {
            out.push(text);
        }
    };

    let own = gather_text(node);
    if !own.is_empty() {
        push(own);
    }
    for attr in TEXT_ATTRIBUTES {
        if let Some(value) = node.attr(attr) {
            push(value);
        }
    }
    for annotation in &node.annotations {
        push(annotation.clone());
    }
    out
}

/// Recursively concatenated own and descendant text, whitespace-collapsed.
fn gather_text(node: &DomSnapshotNode) -> String {
    let mut parts = Vec::new();
    if !node.text.trim().is_empty() {
        parts.push(node.text.trim().to_string());
    }
    for child in &node.children {
        let nested = gather_text(child);
        if !nested.is_empty() {
            parts.push(nested);
        }
    }
    parts
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
