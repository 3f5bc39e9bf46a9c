//! Helpers for embedding user-supplied text in SQL patterns.

/// Escape `LIKE`/`ILIKE` wildcards so user text matches literally.
///
/// The result is meant for patterns using the default `\` escape character.
///
/// ```
/// use cms_common::validation::escape_like;
///
/// assert_eq!(escape_like("50%_off"), r"50\%\_off");
/// ```
pub fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("plain"), "plain");
        assert_eq!(escape_like("100%"), r"100\%");
        assert_eq!(escape_like(r"a\b"), r"a\\b");
        assert_eq!(escape_like("snake_case"), r"snake\_case");
    }

    proptest! {
        #[test]
        fn escaped_text_has_no_bare_wildcards(text in ".*") {
            let escaped = escape_like(&text);
            let mut chars = escaped.chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    let next = chars.next();
                    prop_assert!(matches!(next, Some('\\' | '%' | '_')));
                } else {
                    prop_assert!(c != '%' && c != '_');
                }
            }
        }
    }
}
