use std::collections::HashSet;

use crate::persona::clean_trait;
use crate::utils::TextUtils;

/// Lines containing any of these are model refusals, not traits.
pub const REJECTION_MARKERS: &[&str] = &["no new health", "no new trait", "invalid"];

/// Turn a newline-separated model answer into lowercase, de-duplicated traits.
pub fn parse_trait_response(response: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    response
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| {
            !REJECTION_MARKERS
                .iter()
                .any(|marker| TextUtils::contains_ignore_case(line, marker))
        })
        .filter_map(clean_trait)
        .map(|t| t.to_lowercase())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_lines_collapse_to_one() {
        assert_eq!(
            parse_trait_response("frequent traveler\nfrequent traveler"),
            vec!["frequent traveler"]
        );
    }

    #[test]
    fn drops_rejections_and_blank_lines() {
        let parsed = parse_trait_response(
            "No new health-related traits found\n\n- Prefers Public Transport\nINVALID request\n2. composts",
        );
        assert_eq!(parsed, vec!["prefers public transport", "composts"]);
    }

    #[test]
    fn empty_response_yields_nothing() {
        assert!(parse_trait_response("").is_empty());
        assert!(parse_trait_response("  \n \n").is_empty());
    }
}
