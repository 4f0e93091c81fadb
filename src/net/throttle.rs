//! Silent-throttle detection (spec §4.B, §6): several sites return HTTP 200
//! with a "temporarily blocked" body instead of an honest error status.

use regex::Regex;

/// Returns true if `body` matches any configured throttle pattern. Patterns
/// are matched against the raw bytes interpreted lossily as UTF-8 — good
/// enough to spot an HTML block page, and never panics on non-UTF8 bodies.
pub fn is_throttled(patterns: &[Regex], body: &[u8]) -> bool {
    if patterns.is_empty() {
        return false;
    }
    let text = String::from_utf8_lossy(body);
    patterns.iter().any(|re| re.is_match(&text))
}

pub fn compile_patterns(raw: &[String]) -> Result<Vec<Regex>, regex::Error> {
    raw.iter().map(|p| Regex::new(p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_configured_pattern() {
        let patterns = compile_patterns(&["(?i)temporarily blocked".to_string()]).unwrap();
        assert!(is_throttled(&patterns, b"<html>You have been Temporarily Blocked</html>"));
    }

    #[test]
    fn no_match_on_normal_body() {
        let patterns = compile_patterns(&["(?i)temporarily blocked".to_string()]).unwrap();
        assert!(!is_throttled(&patterns, b"<html>Deck List</html>"));
    }

    #[test]
    fn empty_pattern_list_never_matches() {
        assert!(!is_throttled(&[], b"anything"));
    }
}
