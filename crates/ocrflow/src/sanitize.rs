//! Helpers for sanitizing data before it enters tracing span attributes.
//!
//! Inline page content can be large (base64 images) or private (HTML bodies),
//! and document paths reveal directory layout. These helpers keep spans and
//! log lines short and free of that data.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Returns at most `max_chars` characters of `content`, with an ellipsis
/// when truncated.
pub fn preview(content: &str, max_chars: usize) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
