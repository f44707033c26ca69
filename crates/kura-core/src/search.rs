//! Search-term handling and result shaping for the class typeahead.

use crate::defaults::SEARCH_TERM_MAX_LEN;
use crate::models::ClassSearchHit;

/// Clean a raw search term.
///
/// Truncates to [`SEARCH_TERM_MAX_LEN`] characters, turns tabs and newlines
/// into spaces, drops `(),"'` and trims. Returns `None` when nothing usable
/// remains.
pub fn sanitize_search_term(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .take(SEARCH_TERM_MAX_LEN)
        .filter_map(|c| match c {
            '\t' | '\n' | '\r' => Some(' '),
            '(' | ')' | ',' | '"' | '\'' => None,
            other => Some(other),
        })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Escape LIKE/ILIKE wildcard characters (`%`, `_`, `\`) in user input.
pub fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Case-insensitive substring match used by the in-memory store.
pub fn matches_term(haystack: Option<&str>, term_lower: &str) -> bool {
    haystack.is_some_and(|h| h.to_lowercase().contains(term_lower))
}

/// Typeahead display string: `"{title} · {local_number} · {total} items"`.
pub fn display_string(title: &str, local_number: Option<&str>, total: i64) -> String {
    match local_number {
        Some(n) => format!("{} · {} · {} items", title, n, total),
        None => format!("{} · {} items", title, total),
    }
}

/// Order hits by total count descending, then by display string.
pub fn rank_hits(hits: &mut [ClassSearchHit]) {
    hits.sort_by(|a, b| {
        b.object_count_total
            .cmp(&a.object_count_total)
            .then_with(|| a.display.cmp(&b.display))
    });
}
