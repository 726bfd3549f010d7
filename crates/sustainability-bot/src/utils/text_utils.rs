//! Small text routines used when cleaning model output

use std::borrow::Cow;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Bullets, dashes and `1.` / `1)` numbering at the start of a line.
    // Numbering needs trailing whitespace so decimals like `1.5` survive.
    static ref LIST_MARKER_REGEX: Regex =
        Regex::new(r"^\s*(?:[-*•–—]+|\d+[.)](?:\s+|$))\s*").expect("static regex");
}

pub struct TextUtils;

impl TextUtils {
    /// Case-insensitive substring test.
    pub fn contains_ignore_case(text: &str, pattern: &str) -> bool {
        if pattern.is_empty() {
            return true;
        }
        text.to_lowercase().contains(&pattern.to_lowercase())
    }

    /// Remove one leading list marker and the whitespace around it.
    pub fn strip_list_marker(line: &str) -> &str {
        match LIST_MARKER_REGEX.find(line) {
            Some(m) => line[m.end()..].trim(),
            None => line.trim(),
        }
    }

    /// Truncate on a char boundary, appending `...` when shortened.
    pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> Cow<'_, str> {
        if text.chars().count() <= max_chars {
            return Cow::Borrowed(text);
        }
        let keep = max_chars.saturating_sub(3);
        let mut out: String = text.chars().take(keep).collect();
        out.push_str("...");
        Cow::Owned(out)
    }
}
