//! Closed grammar for selector-scheme strings.
//!
//! LLM-authored targets carry selectors as prefixed strings (`css=...`,
//! `xpath=...`, `role=button[name="Search"]`, `text=Submit`, `index=5`).
//! The scheme list is closed and exhaustively matched; adding a scheme is a
//! compile-time-checked change.

/// Recognized selector schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorScheme {
    Css,
    XPath,
    Role,
    AriaLabel,
    Index,
    /// `text=` is recognized so its payload can be routed to free-text
    /// matching instead of selector matching.
    Text,
}

impl SelectorScheme {
    /// Parse a raw string into a scheme and its payload. Prefix matching is
    /// ASCII-case-insensitive; unknown prefixes yield `None`.
    pub fn parse(raw: &str) -> Option<(SelectorScheme, &str)> {
        const PREFIXES: [(&str, SelectorScheme); 7] = [
            ("css=", SelectorScheme::Css),
            ("xpath=", SelectorScheme::XPath),
            ("role=", SelectorScheme::Role),
            ("aria-label=", SelectorScheme::AriaLabel),
            ("aria_label=", SelectorScheme::AriaLabel),
            ("index=", SelectorScheme::Index),
            ("text=", SelectorScheme::Text),
        ];
        let trimmed = raw.trim();
        for (prefix, scheme) in PREFIXES {
            if let Some(head) = trimmed.get(..prefix.len()) {
                if head.eq_ignore_ascii_case(prefix) {
                    return Some((scheme, &trimmed[prefix.len()..]));
                }
            }
        }
        None
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SelectorScheme::Css => "css",
            SelectorScheme::XPath => "xpath",
            SelectorScheme::Role => "role",
            SelectorScheme::AriaLabel => "aria-label",
            SelectorScheme::Index => "index",
            SelectorScheme::Text => "text",
        }
    }
}

/// Extract the `name` payload from a role selector body such as
/// `button[name="Search"]` or `link[name=Home]`.
pub fn role_selector_name(payload: &str) -> Option<&str> {
    let start = payload.find("[name=")? + "[name=".len();
    let rest = &payload[start..];
    let end = rest.find(']')?;
    let name = rest[..end].trim().trim_matches(|c| c == '"' || c == '\'');
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// The role token of a role selector body (`button[name="Search"]` → `button`).
pub fn role_selector_role(payload: &str) -> &str {
    match payload.find('[') {
        Some(pos) => payload[..pos].trim(),
        None => payload.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_scheme() {
        assert_eq!(
            SelectorScheme::parse("css=#login"),
            Some((SelectorScheme::Css, "#login"))
        );
        assert_eq!(
            SelectorScheme::parse("xpath=//a[1]"),
            Some((SelectorScheme::XPath, "//a[1]"))
        );
        assert_eq!(
            SelectorScheme::parse("role=button[name=\"Go\"]"),
            Some((SelectorScheme::Role, "button[name=\"Go\"]"))
        );
        assert_eq!(
            SelectorScheme::parse("aria-label=Close"),
            Some((SelectorScheme::AriaLabel, "Close"))
        );
        assert_eq!(
            SelectorScheme::parse("aria_label=Close"),
            Some((SelectorScheme::AriaLabel, "Close"))
        );
        assert_eq!(
            SelectorScheme::parse("index=12"),
            Some((SelectorScheme::Index, "12"))
        );
        assert_eq!(
            SelectorScheme::parse("text=Sign in"),
            Some((SelectorScheme::Text, "Sign in"))
        );
    }

    #[test]
    fn prefix_match_is_case_insensitive_and_trims() {
        assert_eq!(
            SelectorScheme::parse("  CSS=#x  "),
            Some((SelectorScheme::Css, "#x"))
        );
    }

    #[test]
    fn rejects_unknown_prefixes_and_plain_text() {
        assert_eq!(SelectorScheme::parse("Sign in"), None);
        assert_eq!(SelectorScheme::parse("data-test=foo"), None);
        assert_eq!(SelectorScheme::parse(""), None);
    }

    #[test]
    fn role_name_extraction() {
        assert_eq!(role_selector_name("button[name=\"Search\"]"), Some("Search"));
        assert_eq!(role_selector_name("link[name=Home]"), Some("Home"));
        assert_eq!(role_selector_name("button"), None);
        assert_eq!(role_selector_role("button[name=\"Search\"]"), "button");
        assert_eq!(role_selector_role("tab"), "tab");
    }

    #[test]
    fn multibyte_payloads_do_not_panic() {
        assert_eq!(
            SelectorScheme::parse("text=検索"),
            Some((SelectorScheme::Text, "検索"))
        );
        assert_eq!(SelectorScheme::parse("検索"), None);
    }
}
