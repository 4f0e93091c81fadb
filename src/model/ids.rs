//! Deterministic, URL-safe identifier derivation (spec §3 invariant 4).

/// Turn an arbitrary site identifier into a URL-safe slug.
///
/// Only ASCII alphanumerics, `-` and `_` survive; everything else becomes a
/// single `-`, and runs of `-` collapse. This is deliberately simple: ids
/// come from the source site (a numeric deck id, a product slug), never from
/// scraped card content, so we don't need anything collision-resistant, only
/// stable and filesystem/URL safe.
pub fn slugify(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_dash = false;
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            out.push(c.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "unknown".to_owned()
    } else {
        trimmed.to_owned()
    }
}
