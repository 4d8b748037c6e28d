//! Platform classification.
//!
//! Pattern groups are tried in a fixed order and the first group with a match
//! wins. Text that matches nothing is attributed to [`DEFAULT_PLATFORM`].

use std::sync::LazyLock;

use regex::Regex;

use crate::models::Platform;

/// Platform assigned when no pattern group matches.
pub const DEFAULT_PLATFORM: Platform = Platform::Facebook;

/// Ordered (platform, patterns) cascade. Patterns are matched against
/// lower-cased text.
const CASCADE: &[(Platform, &[&str])] = &[
    (
        Platform::Facebook,
        &[
            r"facebook",
            r"fb\.com",
            r"fb\.me",
            r"meta",
            r"face",
            r"verify facebook",
            r"facebook code",
            r"fb code",
            r"facebook login",
            r"fb login",
        ],
    ),
    (
        Platform::WhatsApp,
        &[
            r"whatsapp",
            r"wa\.me",
            r"whats app",
            r"whats",
            r"verify whatsapp",
            r"whatsapp code",
            r"wa code",
            r"whatsapp login",
        ],
    ),
    (
        Platform::Instagram,
        &[
            r"instagram",
            r"ig",
            r"insta",
            r"verify instagram",
            r"instagram code",
            r"ig code",
            r"instagram login",
        ],
    ),
];

struct PatternGroup {
    platform: Platform,
    patterns: Vec<Regex>,
}

static GROUPS: LazyLock<Vec<PatternGroup>> = LazyLock::new(|| {
    CASCADE
        .iter()
        .map(|(platform, patterns)| PatternGroup {
            platform: *platform,
            patterns: patterns
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
        })
        .collect()
});

/// Classify a message from its sid, body and label cell.
pub fn classify(sid: &str, message: &str, raw_text: &str) -> Platform {
    let combined = format!("{sid} {message} {raw_text}").to_lowercase();

    GROUPS
        .iter()
        .find_map(|group| {
            group
                .patterns
                .iter()
                .any(|re| re.is_match(&combined))
                .then(|| {
                    log::debug!("Classified as {} by pattern group", group.platform);
                    group.platform
                })
        })
        .unwrap_or(DEFAULT_PLATFORM)
}

/// Whether records of this platform are emitted by the extractor.
pub fn is_supported(platform: Platform) -> bool {
    Platform::ALL.contains(&platform)
}
