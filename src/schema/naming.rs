//! snake_case naming convention for tables and columns
//!
//! Normalized identifiers never contain the path separator (`__`) past their
//! leading underscores, so joining segments with it is unambiguous.

use once_cell::sync::Lazy;
use regex::Regex;

static CAMEL_LOWER_UPPER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([a-z0-9])([A-Z])").unwrap()
});

static CAMEL_ACRONYM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([A-Z]+)([A-Z][a-z])").unwrap()
});

static NON_IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[^a-z0-9_]+").unwrap()
});

static UNDERSCORE_RUNS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"_{2,}").unwrap()
});

/// Normalize an identifier to snake_case.
///
/// ```rust
/// use relnorm::schema::naming::snake_case;
///
/// assert_eq!(snake_case("createdAt"), "created_at");
/// assert_eq!(snake_case("HTTPStatus"), "http_status");
/// assert_eq!(snake_case("_record_hash"), "_record_hash");
/// ```
pub fn snake_case(name: &str) -> String {
    let leading = name.len() - name.trim_start_matches('_').len();
    let (prefix, rest) = name.split_at(leading);

    let rest = CAMEL_ACRONYM.replace_all(rest, "${1}_${2}");
    let rest = CAMEL_LOWER_UPPER.replace_all(&rest, "${1}_${2}");
    let rest = rest.to_lowercase();
    let rest = NON_IDENTIFIER.replace_all(&rest, "_");
    let rest = UNDERSCORE_RUNS.replace_all(&rest, "_");

    let mut out = String::with_capacity(prefix.len() + rest.len() + 1);
    if prefix.is_empty() && rest.starts_with(|c: char| c.is_ascii_digit()) {
        out.push('_');
    }
    out.push_str(prefix);
    out.push_str(&rest);

    if out.is_empty() {
        out.push('_');
    }
    out
}
