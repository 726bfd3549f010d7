use std::collections::BTreeSet;

use crate::utils::TextUtils;

/// Strip list markers and surrounding whitespace. `None` when nothing is left.
///
/// Case is preserved; lowercasing belongs to the response parser.
pub fn clean_trait(raw: &str) -> Option<String> {
    let cleaned = TextUtils::strip_list_marker(raw.trim());
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Union of the stored traits with the cleaned incoming ones.
pub fn merge_traits<I, S>(existing: &BTreeSet<String>, incoming: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut merged = existing.clone();
    merged.extend(incoming.into_iter().filter_map(|t| clean_trait(t.as_ref())));
    merged
}
