//! URL classification

use crate::types::LinkType;
use regex::Regex;
use std::sync::LazyLock;

/// Host patterns in match order; anything else is [`LinkType::Default`]
const PATTERNS: &[(&str, LinkType)] = &[
    (r"^https://([\w-]+\.)?zoom\.us/", LinkType::Zoom),
    (r"^https://mediasite\.[\w.-]+/", LinkType::LectureCapture),
    (r"^https://(www\.)?instagram\.com/reels?/", LinkType::Reel),
];

static CLASSIFIERS: LazyLock<Vec<(Regex, LinkType)>> = LazyLock::new(|| {
    PATTERNS
        .iter()
        .filter_map(|(pattern, link_type)| {
            Regex::new(pattern)
                .map_err(|e| {
                    tracing::warn!("Invalid link pattern '{}': {}", pattern, e);
                })
                .ok()
                .map(|regex| (regex, *link_type))
        })
        .collect()
});

impl LinkType {
    /// Classify `url` by its host
    ///
    /// Only the scheme and host take part; path and query never change the
    /// result.
    pub fn classify(url: &str) -> LinkType {
        CLASSIFIERS
            .iter()
            .find(|(regex, _)| regex.is_match(url))
            .map(|(_, link_type)| *link_type)
            .unwrap_or_default()
    }
}
