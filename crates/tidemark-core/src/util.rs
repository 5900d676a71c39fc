//! Shared utility functions used across multiple modules.

use std::time::Duration;

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Check if a string starts with `http://` or `https://`.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Truncate text to at most 180 characters for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Render a cache age the way status badges show it.
pub fn format_cache_age(age: Duration) -> String {
    let minutes = age.as_secs() / 60;
    if minutes < 1 {
        return "< 1 min old".to_string();
    }
    if minutes < 60 {
        return format!("{minutes} min old");
    }
    format!("{}h old", minutes / 60)
}
