//! Glob matching of URLs against conversion rule patterns.

use url::Url;

/// Returns `true` if `url` matches `pattern`, where `*` matches any run of
/// characters (including none) and every other character matches literally.
/// Matching is over the full URL string and case-sensitive.
pub fn match_url_pattern(url: &Url, pattern: &str) -> bool {
    glob_match(url.as_str().as_bytes(), pattern.as_bytes())
}

// Iterative wildcard match with single-level backtracking: remember the
// position of the last `*` and the text position it was matched against.
fn glob_match(text: &[u8], pattern: &[u8]) -> bool {
    let (mut t, mut p) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            // Let the last `*` consume one more character and retry.
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }

    p == pattern.len()
}
