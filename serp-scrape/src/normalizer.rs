//! Raw search items → unified export schema.
//!
//! Normalisation never fails: input that cannot be read as a search item
//! becomes an empty [`UnifiedItem`] and is logged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serp_common::Status;
use serp_cse::mapping::meta_description;
use serp_cse::{RawResultItem, SearchQuery, SearchResultEntry};

use crate::followers::{FollowerMatch, extract_followers_from};

const PROFESSIONAL_NETWORK_HOST: &str = "linkedin.com";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedItem {
    pub search_query: SearchQuery,
    #[serde(default)]
    pub organic_results: Vec<OrganicResult>,
    #[serde(default)]
    pub people_also_ask: Vec<PeopleAlsoAskItem>,
    #[serde(default)]
    pub related_searches: Vec<Value>,
    #[serde(default)]
    pub ads: Vec<AdItem>,
    #[serde(default)]
    pub ai_overview: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganicResult {
    pub position: Option<u32>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub displayed_url: Option<String>,
    pub snippet: Option<String>,
    #[serde(default)]
    pub site_links: Vec<Value>,
    pub metatags: Option<Map<String, Value>>,
    pub connections_text: Option<String>,
    pub connections_count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeopleAlsoAskItem {
    pub question: Option<String>,
    pub answer: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdItem {
    pub position: Option<u32>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub advertiser: Option<String>,
    pub snippet: Option<String>,
}

pub fn normalize(raw: &RawResultItem) -> UnifiedItem {
    let unified = UnifiedItem {
        search_query: SearchQuery {
            term: raw.search_query.term.clone(),
            page: raw.search_query.page.max(1),
        },
        organic_results: raw.search_results.iter().map(normalize_organic).collect(),
        people_also_ask: raw.people_also_ask.iter().map(normalize_paa).collect(),
        related_searches: raw.related_searches.clone(),
        ads: raw.ads.iter().map(normalize_ad).collect(),
        ai_overview: raw.ai_overview.clone(),
    };
    if unified.organic_results.is_empty() {
        tracing::debug!(action = "normalize", status = %Status::Warning, term = %unified.search_query.term, "no organic results on item");
    }
    unified
}

/// Normalise an untyped item, accepting the field aliases other SERP
/// tools emit (`organicResults`, `query`, `paidResults`, ...).
pub fn normalize_value(value: Value) -> UnifiedItem {
    let fallback_term = ["query", "searchTerm"]
        .iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))
        .map(str::to_string);
    let fallback_page = value.get("page").and_then(coerce_u32);

    match serde_json::from_value::<RawResultItem>(value) {
        Ok(mut raw) => {
            if raw.search_query.term.is_empty() {
                if let Some(term) = fallback_term {
                    raw.search_query.term = term;
                }
            }
            if let Some(page) = fallback_page {
                if raw.search_query.page <= 1 {
                    raw.search_query.page = page;
                }
            }
            normalize(&raw)
        }
        Err(err) => {
            tracing::error!(action = "normalize", status = %Status::Fail, error = %err, "normalization failed");
            UnifiedItem::default()
        }
    }
}

pub fn normalize_all(raw: &[RawResultItem]) -> Vec<UnifiedItem> {
    raw.iter().map(normalize).collect()
}

fn normalize_organic(entry: &SearchResultEntry) -> OrganicResult {
    let best_meta = meta_description(entry.metatags.as_ref());
    let mut snippet = non_empty(&entry.snippet);
    if let Some(meta) = &best_meta {
        let current_len = snippet.as_deref().map_or(0, |s| s.chars().count());
        if is_truncated(snippet.as_deref()) || meta.chars().count() > current_len {
            snippet = Some(meta.clone());
        }
    }

    let url = non_empty(&entry.url);
    let connections = url
        .as_deref()
        .filter(|u| u.to_lowercase().contains(PROFESSIONAL_NETWORK_HOST))
        .and_then(|_| extract_followers_from(best_meta.as_deref().into_iter().chain(snippet.as_deref())));
    let (connections_text, connections_count) = match connections {
        Some(FollowerMatch { text, count }) => (Some(text), count),
        None => (None, None),
    };

    OrganicResult {
        position: (entry.position > 0).then_some(entry.position),
        title: non_empty(&entry.title),
        url,
        displayed_url: non_empty(&entry.displayed_url),
        snippet,
        site_links: entry.site_links.clone(),
        metatags: entry.metatags.clone().filter(|m| !m.is_empty()),
        connections_text,
        connections_count,
    }
}

fn normalize_paa(value: &Value) -> PeopleAlsoAskItem {
    PeopleAlsoAskItem {
        question: string_field(value, &["question"]),
        answer: string_field(value, &["answer"]),
        url: string_field(value, &["url"]),
    }
}

fn normalize_ad(value: &Value) -> AdItem {
    AdItem {
        position: value.get("position").and_then(coerce_u32),
        title: string_field(value, &["title"]),
        url: string_field(value, &["url", "link"]),
        advertiser: string_field(value, &["advertiser", "source"]),
        snippet: string_field(value, &["description", "snippet"]),
    }
}

/// Ends in an ellipsis marker or lacks terminal punctuation.
fn is_truncated(text: Option<&str>) -> bool {
    let Some(t) = text.map(str::trim).filter(|t| !t.is_empty()) else {
        return false;
    };
    t.contains("...") || !t.ends_with(['.', '!', '?', '…'])
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str).filter(|s| !s.is_empty()))
        .map(str::to_string)
}

/// Integer-ish values: numbers or numeric strings (`"3"`, `"3.0"`).
fn coerce_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_f64().map(|f| f as u32),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as u32),
        _ => None,
    }
}
