//! Shared utility functions used across the codebase.

use sha2::{Digest, Sha256};

/// Marker appended when text is cut to a character budget.
pub const TRUNCATION_MARKER: &str = "\n... [truncated]";

/// Truncate `text` to at most `max_chars` characters, appending
/// [`TRUNCATION_MARKER`] when anything was cut.
///
/// Counts `char`s rather than bytes so multi-byte content is never split.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{}", &text[..byte_idx], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

/// SHA-256 of `text`, hex encoded.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Strip a surrounding markdown code fence (```` ```json ... ``` ````) from a
/// model response.
///
/// Unfenced input is returned trimmed, so fenced and unfenced forms of the
/// same payload yield the same slice.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json", "JSON", ...) on the opening line.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Locate the outermost JSON object in a response that may carry prose
/// around it.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
