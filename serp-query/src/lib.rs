//! Query normalization for the search pipeline.
//!
//! A raw keyword goes through [`clean`], [`apply_scope_filters`] and, when
//! [`should_split`] says it is too long, [`split`]. The lowercase
//! [`dedup_key`] of the scoped query decides whether two inputs are the same
//! search; [`query_hash`] turns that key into a stable identifier for logs.
//!
//! ```
//! use serp_query::{normalize, split, should_split};
//!
//! let q = normalize("  (OR rust   developer AND) OR ", &["site:linkedin.com/in".to_string()]);
//! assert_eq!(q.cleaned, "(rust developer) (site:linkedin.com/in)");
//! assert_eq!(q.key, "(rust developer) (site:linkedin.com/in)");
//! assert!(!should_split(&q.cleaned));
//! assert_eq!(split("").len(), 0);
//! ```
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

const MAX_QUERY_CHARS: usize = 256;
const MAX_QUERY_TOKENS: usize = 14;
const TOKENS_PER_CHUNK: usize = 8;
const MIN_CHUNKS: usize = 3;
pub const MAX_CHUNKS: usize = 6;
const MAX_CLEAN_PASSES: usize = 16;
const SITE_PREFIX: &str = "site:";

static OPEN_PAREN_OPERATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\(\s*(?:OR|AND)\s+").expect("valid regex"));
static OPERATOR_CLOSE_PAREN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+(?:OR|AND)\s*\)").expect("valid regex"));
static REPEATED_OPERATORS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(OR|AND)\b(?:\s+\b(?:OR|AND)\b)+").expect("valid regex")
});
static TRAILING_OPERATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:\s+\b(?:OR|AND)\b)+\s*$").expect("valid regex"));
static LEADING_OPERATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*\b(?:OR|AND)\b\s+").expect("valid regex"));
static EMPTY_GROUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\s*\)").expect("valid regex"));

/// Result of [`normalize`]: the query to send and its deduplication key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedQuery {
    pub cleaned: String,
    pub key: String,
}

/// Clean a raw query: collapse whitespace, drop dangling and repeated boolean
/// operators, remove empty groups and balance parentheses.
///
/// Passes repeat until the string is stable, so the result is a fixed point:
/// `clean(&clean(x)) == clean(x)`.
pub fn clean(raw: &str) -> String {
    let mut current = collapse_whitespace(raw);
    for _ in 0..MAX_CLEAN_PASSES {
        let next = clean_pass(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn clean_pass(input: &str) -> String {
    let query = collapse_whitespace(input);
    if query.is_empty() {
        return query;
    }

    let query = OPEN_PAREN_OPERATOR.replace_all(&query, "(");
    let query = OPERATOR_CLOSE_PAREN.replace_all(&query, ")");
    let query = REPEATED_OPERATORS.replace_all(&query, "${1}");
    let query = TRAILING_OPERATORS.replace_all(&query, "");
    let query = LEADING_OPERATOR.replace_all(&query, "");

    let mut query = query.into_owned();
    loop {
        let next = EMPTY_GROUP.replace_all(&query, "").into_owned();
        if next == query {
            break;
        }
        query = next;
    }

    collapse_whitespace(&balance_parens(&query))
}

/// Drop closers without an opener and append closers for unclosed openers.
fn balance_parens(query: &str) -> String {
    let mut out = String::with_capacity(query.len() + 4);
    let mut open = 0usize;
    for ch in query.chars() {
        match ch {
            '(' => {
                open += 1;
                out.push(ch);
            }
            ')' if open > 0 => {
                open -= 1;
                out.push(ch);
            }
            ')' => {}
            _ => out.push(ch),
        }
    }
    out.extend(std::iter::repeat_n(')', open));
    out
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// True when the query is longer than 256 characters or has more than 14 tokens.
pub fn should_split(cleaned: &str) -> bool {
    cleaned.chars().count() > MAX_QUERY_CHARS
        || cleaned.split_whitespace().count() > MAX_QUERY_TOKENS
}

/// Partition tokens into 3 to 6 roughly even chunks of about eight tokens.
///
/// At most [`MAX_CHUNKS`] chunks are returned; tokens past the sixth chunk
/// are dropped.
pub fn split(cleaned: &str) -> Vec<String> {
    let tokens: Vec<&str> = cleaned.split_whitespace().collect();
    if tokens.is_empty() {
        return Vec::new();
    }
    let size = chunk_size(tokens.len());
    tokens
        .chunks(size)
        .take(MAX_CHUNKS)
        .map(|chunk| chunk.join(" "))
        .collect()
}

/// Tokens per chunk for a query of `token_count` tokens.
pub fn chunk_size(token_count: usize) -> usize {
    let chunks = token_count
        .div_ceil(TOKENS_PER_CHUNK)
        .clamp(MIN_CHUNKS, MAX_CHUNKS);
    token_count.div_ceil(chunks).max(1)
}

/// Append ` (site:a OR site:b)` unless one of the scopes' domains already
/// appears in the query. Entries without a `site:` prefix are ignored.
pub fn apply_scope_filters(cleaned: &str, scopes: &[String]) -> String {
    if cleaned.is_empty() {
        return String::new();
    }
    let valid: Vec<&str> = scopes
        .iter()
        .map(String::as_str)
        .filter(|s| !s.trim().is_empty() && s.starts_with(SITE_PREFIX))
        .collect();
    if valid.is_empty() {
        return cleaned.to_string();
    }

    let lowered = cleaned.to_lowercase();
    let already_scoped = valid
        .iter()
        .filter_map(|s| s.split_once(':').map(|(_, domain)| domain.to_lowercase()))
        .any(|domain| lowered.contains(&domain));
    if already_scoped {
        return cleaned.to_string();
    }

    format!("{cleaned} ({})", valid.join(" OR "))
}

/// Lowercase, whitespace-collapsed form of a scoped query.
pub fn dedup_key(scoped: &str) -> String {
    collapse_whitespace(&scoped.to_lowercase())
}

/// Hex BLAKE3 digest of a dedup key, used as a log identifier.
pub fn query_hash(key: &str) -> String {
    blake3::hash(key.as_bytes()).to_hex().to_string()
}

/// Clean and scope `raw`, returning the query to send and its dedup key.
pub fn normalize(raw: &str, scopes: &[String]) -> NormalizedQuery {
    let cleaned = apply_scope_filters(&clean(raw), scopes);
    let key = dedup_key(&cleaned);
    NormalizedQuery { cleaned, key }
}
