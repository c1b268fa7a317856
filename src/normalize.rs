//! Text canonicalization for fuzzy element matching.
//!
//! Every string the catalog and DOM lookups compare goes through
//! [`normalize`] first, so Unicode form, case, and whitespace differences
//! never affect scoring.

use unicode_normalization::UnicodeNormalization;

/// Canonicalize a string for comparison: Unicode NFC, trim, collapse
/// internal whitespace runs to a single space, lowercase.
///
/// Total: any input yields a valid result, empty input yields `""`.
pub fn normalize(text: &str) -> String {
    let composed: String = text.nfc().collect();
    let collapsed = composed.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_lowercases() {
        assert_eq!(normalize("  Submit \t the\n form  "), "submit the form");
    }

    #[test]
    fn empty_input_yields_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   \t\n"), "");
    }

    #[test]
    fn composes_combining_characters() {
        // "e" + U+0301 combining acute composes to precomposed "é"
        assert_eq!(normalize("Caf\u{0065}\u{0301}"), "caf\u{e9}");
    }

    #[test]
    fn non_latin_text_passes_through() {
        assert_eq!(normalize(" 検索 "), "検索");
    }
}
