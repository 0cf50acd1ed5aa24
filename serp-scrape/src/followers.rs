//! Follower / connection counts from profile snippets.
//!
//! Recognises "<number> <term>" and "<term> <number>" forms in thirteen
//! locales, with `K`/`M`/`B` suffixes, trailing `+`, and grouped digits
//! (`1 234`, `1,234`, `1.234`).

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serp_common::Status;

const TERMS: &[&str] = &[
    r"followers?",
    r"connections?",
    r"người\s+theo\s+dõi",
    r"kết\s+nối",
    r"seguidores?",
    r"conexiones?",
    r"conexões",
    r"abonnés?",
    r"relations?",
    r"abonnenten",
    r"kontakte",
    r"seguaci",
    r"connessioni",
    r"pengikut",
    r"koneksi",
    r"takipçi",
    r"bağlantı",
    r"ผู้ติดตาม",
    r"การเชื่อมต่อ",
    r"フォロワー",
    r"つながり",
    r"팔로워",
    r"연결",
    r"关注者",
    r"人脉",
];

const NUM: &str = r"(?P<num>\d{1,3}(?:[\s.,]\d{3})+|\d+(?:[.,]\d+)?)";
const SUFFIX: &str = r"(?P<suf>[KkMmBb]?)";
const SEP: &str = r"[\s\x{00A0}]*";
/// A leading number must not start inside another run of digits.
const LEAD: &str = r"(?:^|\D)";

/// Tried in order; the first pattern that matches anywhere wins. The label
/// itself is the `hit` group.
static PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    let words = format!("(?:{})", TERMS.join("|"));
    [
        format!(r"(?i){LEAD}(?P<hit>{NUM}{SEP}{SUFFIX}{SEP}\+?{SEP}{words}\b)"),
        format!(r"(?i){LEAD}(?P<hit>{NUM}{SEP}{words}\b)"),
        format!(r"(?i)(?P<hit>\b{words}{SEP}{NUM}{SEP}{SUFFIX}{SEP}\+?)"),
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid follower regex"))
    .collect()
});

/// A matched label and its normalised count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowerMatch {
    /// The matched fragment, trimmed (e.g. `"1.2K followers"`).
    pub text: String,
    /// `None` when the number could not be interpreted.
    pub count: Option<u64>,
}

/// Find the first follower/connection label in `text`.
///
/// ```
/// use serp_scrape::followers::extract_followers;
///
/// let m = extract_followers("Hanoi · 1.2K followers · 500+ connections").unwrap();
/// assert_eq!(m.text, "1.2K followers");
/// assert_eq!(m.count, Some(1200));
/// assert!(extract_followers("Rust engineer").is_none());
/// ```
pub fn extract_followers(text: &str) -> Option<FollowerMatch> {
    if text.trim().is_empty() {
        return None;
    }
    for pattern in PATTERNS.iter() {
        let Some(caps) = pattern.captures(text) else {
            continue;
        };
        let matched = caps.name("hit").map(|m| m.as_str().trim()).unwrap_or_default();
        let num = caps.name("num").map(|m| m.as_str());
        let suffix = caps.name("suf").map(|m| m.as_str()).unwrap_or("");
        let count = num.and_then(|n| parse_count(n, suffix));
        if count.is_none() {
            tracing::warn!(action = "followers_parse", status = %Status::Warning, fragment = %matched, "follower count could not be parsed");
        }
        return Some(FollowerMatch {
            text: matched.to_string(),
            count,
        });
    }
    None
}

/// First match across several candidate texts, in order.
pub fn extract_followers_from<'a, I>(candidates: I) -> Option<FollowerMatch>
where
    I: IntoIterator<Item = &'a str>,
{
    candidates.into_iter().find_map(extract_followers)
}

/// Normalise a human number. When both `,` and `.` occur the comma groups
/// thousands; a lone comma is a decimal separator.
fn parse_count(num: &str, suffix: &str) -> Option<u64> {
    let mut s: String = num
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{202F}')
        .collect();
    if s.contains(',') && s.contains('.') {
        s = s.replace(',', "");
    } else if s.contains(',') {
        s = s.replace(',', ".");
    }
    let value: f64 = s.parse().ok()?;
    let mult = match suffix.to_ascii_lowercase().as_str() {
        "k" => 1_000.0,
        "m" => 1_000_000.0,
        "b" => 1_000_000_000.0,
        _ => 1.0,
    };
    let scaled = (value * mult).round();
    (scaled.is_finite() && scaled >= 0.0).then_some(scaled as u64)
}
