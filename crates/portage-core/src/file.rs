//! Filename helpers for client-supplied names.

use once_cell::sync::Lazy;
use regex::Regex;

static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("static regex"));

static DASH_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"-{2,}").expect("static regex"));

/// Sanitize a client-supplied filename for storage keys and backend display.
///
/// Replaces unsafe characters with dashes, collapses dash runs, and keeps
/// the extension separator intact so the backend still recognizes the type.
pub fn safe_filename(name: &str) -> String {
    let trimmed = name.trim();
    let replaced = UNSAFE_CHARS.replace_all(trimmed, "-");
    let collapsed = DASH_RUNS.replace_all(&replaced, "-");
    collapsed.trim_matches('-').to_string()
}
