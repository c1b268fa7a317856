//! Fuzzy-match scoring shared by the catalog and DOM lookups.
//!
//! Scoring is deliberately relative: a score only means something compared to
//! other candidates in the same resolution call. The catalog gets higher
//! exact/substring weights than the DOM because its labels are curated.

/// Weights and acceptance thresholds for one lookup source.
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    /// Added when the normalized candidate equals the query.
    pub exact: f64,
    /// Added when either string contains the other (mutually exclusive with
    /// the exact bonus).
    pub substring: f64,
    /// Minimum best score required to accept a match at all.
    pub min_best: f64,
    /// Minimum gap between the best and second-best candidate. Closer than
    /// this is ambiguous and resolution fails closed.
    pub min_margin: f64,
}

/// Curated catalog labels: trust high.
pub const CATALOG_WEIGHTS: ScoreWeights = ScoreWeights {
    exact: 2.2,
    substring: 1.1,
    min_best: 1.35,
    min_margin: 0.25,
};

/// Raw DOM text: trust lower, thresholds looser.
pub const DOM_WEIGHTS: ScoreWeights = ScoreWeights {
    exact: 2.0,
    substring: 1.0,
    min_best: 1.25,
    min_margin: 0.2,
};

/// Score one normalized candidate against a normalized query. The role/action
/// affinity bonus is added separately by the caller.
pub fn score_candidate(query: &str, candidate: &str, weights: &ScoreWeights) -> f64 {
    let mut score = 0.0;
    if candidate == query {
        score += weights.exact;
    } else if candidate.contains(query) || query.contains(candidate) {
        score += weights.substring;
    }
    score + similarity(query, candidate)
}

/// Semantic class an action expects its target to have.
///
/// Used to break ties between same-text candidates: a `click` prefers a
/// `<button>` over a `<span>` with identical visible text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AffinityClass {
    /// click / hover / extract_text
    Pointer,
    /// type / search / submit
    TextEntry,
    /// select_option
    OptionPick,
    /// No preference.
    Neutral,
}

/// Table-driven bonus for how well an element's role/tag fits the action.
pub fn role_bonus(role: &str, tag: &str, class: AffinityClass) -> f64 {
    let role = role.trim().to_lowercase();
    let tag = tag.trim().to_lowercase();
    let mut bonus = 0.0;
    match class {
        AffinityClass::Pointer => {
            if matches!(
                role.as_str(),
                "button" | "link" | "menuitem" | "option" | "radio" | "checkbox" | "tab"
            ) {
                bonus += 0.35;
            }
            if matches!(tag.as_str(), "button" | "a" | "option" | "input") {
                bonus += 0.2;
            }
        }
        AffinityClass::TextEntry => {
            if matches!(
                role.as_str(),
                "textbox" | "combobox" | "searchbox" | "spinbutton"
            ) {
                bonus += 0.5;
            }
            if matches!(tag.as_str(), "input" | "textarea") {
                bonus += 0.35;
            }
        }
        AffinityClass::OptionPick => {
            if matches!(role.as_str(), "listbox" | "combobox") || tag == "select" {
                bonus += 0.5;
            }
        }
        AffinityClass::Neutral => {}
    }
    bonus
}

/// Ratcliff/Obershelp-style sequence similarity in `[0, 1]`.
///
/// 1.0 for identical strings, roughly proportional to the total length of
/// shared blocks otherwise. Exact numeric parity with any particular library
/// is not required; only relative ranking matters.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let matched = matching_chars(&a, &b);
    (2.0 * matched as f64) / ((a.len() + b.len()) as f64)
}

/// Total matched characters: longest common block, then recurse on the
/// unmatched pieces to either side.
fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (ai, bi, len) = longest_block(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_chars(&a[..ai], &b[..bi]) + matching_chars(&a[ai + len..], &b[bi + len..])
}

fn longest_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    // lengths[j] = length of common suffix ending at a[i], b[j-1]
    let mut prev = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        let mut cur = vec![0usize; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            if ca == cb {
                let len = prev[j] + 1;
                cur[j + 1] = len;
                if len > best.2 {
                    best = (i + 1 - len, j + 1 - len, len);
                }
            }
        }
        prev = cur;
    }
    best
}
