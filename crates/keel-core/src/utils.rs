//! UTF-8-safe string truncation utilities.

/// Truncate a string at the nearest char boundary at or before `max_bytes`.
#[must_use]
pub fn truncate_to_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end = end.saturating_sub(1);
    }
    &s[..end]
}

/// Truncate tool output to `max_bytes`, appending a marker when cut.
///
/// A limit of zero disables truncation.
#[must_use]
pub fn truncate_output(output: String, max_bytes: usize) -> String {
    if max_bytes == 0 || output.len() <= max_bytes {
        return output;
    }
    let kept = truncate_to_boundary(&output, max_bytes);
    let dropped = output.len().saturating_sub(kept.len());
    format!("{kept}\n\n[output truncated: {dropped} bytes omitted]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_string_returned_unchanged() {
        assert_eq!(truncate_to_boundary("hello", 200), "hello");
    }

    #[test]
    fn four_byte_char_at_boundary() {
        let mut s = "x".repeat(198);
        s.push('🦀');
        assert_eq!(truncate_to_boundary(&s, 200), "x".repeat(198));
    }

    #[test]
    fn output_marker_reports_dropped_bytes() {
        let out = truncate_output("a".repeat(50), 10);
        assert!(out.starts_with(&"a".repeat(10)));
        assert!(out.ends_with("[output truncated: 40 bytes omitted]"));
    }

    #[test]
    fn zero_limit_disables_truncation() {
        let s = "a".repeat(50);
        assert_eq!(truncate_output(s.clone(), 0), s);
    }
}
