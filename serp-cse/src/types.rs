use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ==============================
// Wire types (Custom Search JSON API)
// ==============================

/// Response body of `GET customsearch/v1`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CseResponse {
    #[serde(default)]
    pub items: Vec<CseItem>,
    #[serde(default)]
    pub search_information: Option<SearchInformation>,
}

impl CseResponse {
    /// `searchInformation.totalResults` when it parses as an integer.
    pub fn total_results(&self) -> Option<u64> {
        self.search_information
            .as_ref()
            .and_then(|info| info.total_results.as_deref())
            .and_then(|s| s.trim().parse().ok())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchInformation {
    /// Provider sends this as a string.
    #[serde(default)]
    pub total_results: Option<String>,
    #[serde(default)]
    pub search_time: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CseItem {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub html_snippet: Option<String>,
    #[serde(default)]
    pub display_link: Option<String>,
    #[serde(default)]
    pub pagemap: Option<Pagemap>,
}

/// Structured page data attached to an item. Only the two sections the
/// mapping uses are typed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pagemap {
    #[serde(default)]
    pub sitelinkssearchbox: Vec<Value>,
    #[serde(default)]
    pub metatags: Vec<Value>,
}

// ==============================
// Error envelope
// ==============================

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GoogleErrorEnvelope {
    pub error: GoogleError,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GoogleError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub errors: Vec<GoogleErrorReason>,
    #[serde(default)]
    pub details: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GoogleErrorReason {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Quota metadata from the `google.rpc.ErrorInfo` detail of a quota error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaInfo {
    pub quota_limit: Option<String>,
    pub quota_limit_value: Option<String>,
    pub quota_metric: Option<String>,
    pub quota_unit: Option<String>,
    pub service: Option<String>,
    pub consumer: Option<String>,
}

// ==============================
// Normalized page items
// ==============================

/// Which query and page a [`RawResultItem`] came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(default, deserialize_with = "lenient::text")]
    pub term: String,
    #[serde(default = "first_page", deserialize_with = "lenient::page")]
    pub page: u32,
}

fn first_page() -> u32 {
    1
}

/// One organic hit, mapped from a provider item.
///
/// Aliases let pages produced by other SERP tools deserialize into the same
/// shape. Fields are read loosely: `null` becomes empty, and `position` may
/// be a number or a numeric string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultEntry {
    #[serde(default, deserialize_with = "lenient::position")]
    pub position: u32,
    #[serde(default, deserialize_with = "lenient::text")]
    pub title: String,
    #[serde(default, alias = "link", alias = "resultUrl", deserialize_with = "lenient::text")]
    pub url: String,
    #[serde(default, alias = "visibleUrl", alias = "displayLink", deserialize_with = "lenient::text")]
    pub displayed_url: String,
    #[serde(default, alias = "description", deserialize_with = "lenient::text")]
    pub snippet: String,
    #[serde(default, alias = "sitelinks", deserialize_with = "lenient::values")]
    pub site_links: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::object")]
    pub metatags: Option<Map<String, Value>>,
}

/// One fetched page, or (after deduplication) one kept result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawResultItem {
    #[serde(default)]
    pub search_query: SearchQuery,
    #[serde(default, alias = "organicResults", deserialize_with = "lenient::entries")]
    pub search_results: Vec<SearchResultEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub people_also_ask: Vec<Value>,
    #[serde(default, alias = "relatedQueries", skip_serializing_if = "Vec::is_empty")]
    pub related_searches: Vec<Value>,
    #[serde(default, alias = "paidResults", skip_serializing_if = "Vec::is_empty")]
    pub ads: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_overview: Option<Value>,
}

impl RawResultItem {
    /// A page item carrying only organic results.
    pub fn organic(term: impl Into<String>, page: u32, results: Vec<SearchResultEntry>) -> Self {
        Self {
            search_query: SearchQuery {
                term: term.into(),
                page,
            },
            search_results: results,
            ..Default::default()
        }
    }
}

/// Loose readers for result pages written by other tools.
mod lenient {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};
    use serde_json::{Map, Value};

    use super::SearchResultEntry;

    pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => String::new(),
        })
    }

    fn number(value: &Value) -> Option<u32> {
        let n = match value {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        (n.is_finite() && n >= 0.0 && n <= f64::from(u32::MAX)).then_some(n as u32)
    }

    /// Unreadable positions become 0, which means "unknown".
    pub fn position<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
        Ok(number(&Value::deserialize(d)?).unwrap_or(0))
    }

    pub fn page<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
        Ok(number(&Value::deserialize(d)?).filter(|p| *p > 0).unwrap_or(1))
    }

    pub fn values<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Value>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Array(items) => items,
            _ => Vec::new(),
        })
    }

    pub fn object<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Map<String, Value>>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Object(map) => Some(map),
            _ => None,
        })
    }

    /// A missing or `null` list is empty and a non-list is an error. Entries
    /// that are not readable objects are skipped, keeping the rest.
    pub fn entries<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<SearchResultEntry>, D::Error> {
        let items = match Value::deserialize(d)? {
            Value::Null => return Ok(Vec::new()),
            Value::Array(items) => items,
            other => return Err(D::Error::custom(format!("expected a list of results, got {other}"))),
        };
        let total = items.len();
        let kept: Vec<SearchResultEntry> = items
            .into_iter()
            .filter(Value::is_object)
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect();
        if kept.len() < total {
            tracing::debug!(action = "parse_results", skipped = total - kept.len(), "unreadable result entries skipped");
        }
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn total_results_parses_string_counts() {
        let resp: CseResponse = serde_json::from_value(json!({
            "searchInformation": { "totalResults": "1250", "searchTime": 0.3 },
            "items": []
        }))
        .unwrap();
        assert_eq!(resp.total_results(), Some(1250));

        let resp: CseResponse =
            serde_json::from_value(json!({ "searchInformation": { "totalResults": "about 10" } }))
                .unwrap();
        assert_eq!(resp.total_results(), None);
        assert_eq!(CseResponse::default().total_results(), None);
    }

    #[test]
    fn result_entry_accepts_other_tool_aliases() {
        let entry: SearchResultEntry = serde_json::from_value(json!({
            "position": 3,
            "title": "Jane Doe",
            "link": "https://vn.linkedin.com/in/jane",
            "visibleUrl": "vn.linkedin.com",
            "description": "Engineer"
        }))
        .unwrap();
        assert_eq!(entry.url, "https://vn.linkedin.com/in/jane");
        assert_eq!(entry.displayed_url, "vn.linkedin.com");
        assert_eq!(entry.snippet, "Engineer");
        assert!(entry.site_links.is_empty());
    }

    #[test]
    fn raw_item_serializes_camel_case_and_skips_empty_slots() {
        let item = RawResultItem::organic(
            "rust",
            2,
            vec![SearchResultEntry {
                position: 11,
                title: "Rust".into(),
                url: "https://rust-lang.org".into(),
                ..Default::default()
            }],
        );
        let v = serde_json::to_value(&item).unwrap();
        assert_eq!(v["searchQuery"]["page"], 2);
        assert_eq!(v["searchResults"][0]["displayedUrl"], "");
        assert!(v.get("peopleAlsoAsk").is_none());
        assert!(v.get("aiOverview").is_none());
    }

    #[test]
    fn loosely_typed_entries_are_kept() {
        let item: RawResultItem = serde_json::from_value(json!({
            "searchQuery": { "term": "q", "page": "2" },
            "searchResults": [
                { "title": "A", "url": "https://a", "displayedUrl": null, "position": 1 },
                { "title": "B", "url": "https://b", "position": "3", "snippet": null, "metatags": "n/a" },
                { "title": null, "link": "https://c", "position": null, "sitelinks": null },
                "not an entry"
            ]
        }))
        .unwrap();
        assert_eq!(item.search_query.page, 2);
        let urls: Vec<&str> = item.search_results.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a", "https://b", "https://c"]);
        assert_eq!(item.search_results[0].displayed_url, "");
        assert_eq!(item.search_results[1].position, 3);
        assert!(item.search_results[1].metatags.is_none());
        assert_eq!(item.search_results[2].position, 0);
        assert_eq!(item.search_results[2].title, "");
    }

    #[test]
    fn non_list_results_reject_the_item() {
        let parsed = serde_json::from_value::<RawResultItem>(json!({ "searchResults": "not a list" }));
        assert!(parsed.is_err());
        let parsed = serde_json::from_value::<RawResultItem>(json!({ "searchResults": null })).unwrap();
        assert!(parsed.search_results.is_empty());
    }

    #[test]
    fn raw_item_reads_organic_results_alias() {
        let item: RawResultItem = serde_json::from_value(json!({
            "searchQuery": { "term": "rust" },
            "organicResults": [{ "title": "A", "url": "u1" }],
            "paidResults": [{ "title": "ad" }]
        }))
        .unwrap();
        assert_eq!(item.search_query.page, 1);
        assert_eq!(item.search_results.len(), 1);
        assert_eq!(item.ads.len(), 1);
    }
}
