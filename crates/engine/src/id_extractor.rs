//! Extraction of verifiable conversion ids from page content or URLs.

use conversions_core::types::{ConversionIdPatternMap, SearchIn};
use conversions_core::{ConversionError, ConversionResult};
use regex::Regex;
use tracing::warn;
use url::Url;

use crate::url_pattern::match_url_pattern;

/// Extracts a conversion id for a rule whose `url_pattern` matched the
/// redirect chain.
///
/// The id-pattern table may override both the regex and where to search:
/// `search_in = url` searches the first redirect-chain URL matching
/// `url_pattern` (no such URL yields an empty id), `search_in = html`
/// searches the page content. Without a table entry the
/// `default_id_pattern` is searched over the page content.
///
/// Absence of a match is a normal outcome; an empty id is returned and the
/// conversion is credited without external verifiability.
pub fn extract_conversion_id(
    html: &str,
    redirect_chain: &[Url],
    url_pattern: &str,
    id_patterns: &ConversionIdPatternMap,
    default_id_pattern: &str,
) -> String {
    let mut id_pattern = default_id_pattern;
    let mut matched_url_spec = None;

    if let Some(entry) = id_patterns.get(url_pattern) {
        if entry.search_in == SearchIn::Url {
            let Some(url) = redirect_chain
                .iter()
                .find(|url| match_url_pattern(url, url_pattern))
            else {
                return String::new();
            };

            matched_url_spec = Some(url.as_str());
        }

        id_pattern = &entry.id_pattern;
    }

    let text = matched_url_spec.unwrap_or(html);

    match first_capture(text, id_pattern) {
        Ok(id) => id.unwrap_or_default(),
        Err(error) => {
            warn!(%error, "Failed to extract conversion id");
            String::new()
        }
    }
}

/// Leftmost regex search returning the first capture group. The regex
/// engine stays behind this seam so it can be swapped or tested alone.
fn first_capture(text: &str, pattern: &str) -> ConversionResult<Option<String>> {
    let regex =
        Regex::new(pattern).map_err(|error| ConversionError::Pattern(error.to_string()))?;

    Ok(regex
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|group| group.as_str().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use conversions_core::types::ConversionIdPattern;
    use std::collections::HashMap;

    const DEFAULT_PATTERN: &str =
        "<meta.*name=\"ad-conversion-id\".*content=\"([-a-zA-Z0-9]*)\".*>";

    fn chain(specs: &[&str]) -> Vec<Url> {
        specs.iter().map(|s| Url::parse(s).unwrap()).collect()
    }

    fn url_table(url_pattern: &str, id_pattern: &str) -> ConversionIdPatternMap {
        let mut table = HashMap::new();
        table.insert(
            url_pattern.to_string(),
            ConversionIdPattern {
                url_pattern: url_pattern.to_string(),
                search_in: SearchIn::Url,
                id_pattern: id_pattern.to_string(),
            },
        );
        table
    }

    #[test]
    fn test_extracts_id_from_matching_chain_url() {
        let id = extract_conversion_id(
            "",
            &chain(&["https://example.com/landing?id=ABC123"]),
            "https://example.com/*",
            &url_table("https://example.com/*", "id=(\\w+)"),
            DEFAULT_PATTERN,
        );

        assert_eq!(id, "ABC123");
    }

    #[test]
    fn test_searches_first_matching_url_in_chain() {
        let id = extract_conversion_id(
            "",
            &chain(&[
                "https://referrer.com/out",
                "https://example.com/landing?id=FIRST",
                "https://example.com/other?id=SECOND",
            ]),
            "https://example.com/*",
            &url_table("https://example.com/*", "id=(\\w+)"),
            DEFAULT_PATTERN,
        );

        assert_eq!(id, "FIRST");
    }

    #[test]
    fn test_empty_id_when_no_chain_url_matches() {
        let id = extract_conversion_id(
            "<html>id=ABC123</html>",
            &chain(&["https://other.com/landing?id=ABC123"]),
            "https://example.com/*",
            &url_table("https://example.com/*", "id=(\\w+)"),
            DEFAULT_PATTERN,
        );

        assert_eq!(id, "");
    }

    #[test]
    fn test_html_search_in() {
        let mut table = HashMap::new();
        table.insert(
            "https://example.com/*".to_string(),
            ConversionIdPattern {
                url_pattern: "https://example.com/*".to_string(),
                search_in: SearchIn::Html,
                id_pattern: "data-order=\"(\\d+)\"".to_string(),
            },
        );

        let id = extract_conversion_id(
            "<div data-order=\"98765\"></div>",
            &chain(&["https://example.com/thanks"]),
            "https://example.com/*",
            &table,
            DEFAULT_PATTERN,
        );

        assert_eq!(id, "98765");
    }

    #[test]
    fn test_falls_back_to_default_pattern_over_html() {
        let id = extract_conversion_id(
            "<meta name=\"ad-conversion-id\" content=\"smartbrownfoxes42\">",
            &chain(&["https://example.com/thanks"]),
            "https://example.com/*",
            &HashMap::new(),
            DEFAULT_PATTERN,
        );

        assert_eq!(id, "smartbrownfoxes42");
    }

    #[test]
    fn test_no_match_yields_empty_id() {
        let id = extract_conversion_id(
            "<html>no id here</html>",
            &chain(&["https://example.com/thanks"]),
            "https://example.com/*",
            &HashMap::new(),
            DEFAULT_PATTERN,
        );

        assert_eq!(id, "");
    }

    #[test]
    fn test_invalid_pattern_is_silent() {
        let id = extract_conversion_id(
            "id=ABC123",
            &chain(&["https://example.com/thanks"]),
            "https://example.com/*",
            &HashMap::new(),
            "id=(unclosed",
        );

        assert_eq!(id, "");
    }

    #[test]
    fn test_first_capture_is_leftmost() {
        assert_eq!(
            first_capture("a=1 a=2", "a=(\\d)").unwrap(),
            Some("1".to_string())
        );
        assert_eq!(first_capture("nothing", "a=(\\d)").unwrap(), None);
    }

    #[test]
    fn test_first_capture_rejects_invalid_pattern() {
        assert!(matches!(
            first_capture("text", "(unclosed"),
            Err(ConversionError::Pattern(_))
        ));
    }
}
