//! Flat export rows, one per result, for JSONL/CSV writers.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::followers::extract_followers_from;
use crate::normalizer::{OrganicResult, UnifiedItem};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrganicRow {
    pub query: String,
    pub page: u32,
    pub fetched_at: String,
    pub position: Option<u32>,
    pub title: String,
    pub url: String,
    pub displayed_url: String,
    pub snippet: String,
    pub connections_text: Option<String>,
    pub connections_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaaRow {
    pub query: String,
    pub page: u32,
    pub fetched_at: String,
    pub question: String,
    pub answer: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelatedRow {
    pub query: String,
    pub page: u32,
    pub fetched_at: String,
    pub related_query: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdRow {
    pub query: String,
    pub page: u32,
    pub fetched_at: String,
    pub position: Option<u32>,
    pub title: String,
    pub url: String,
    pub advertiser: String,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AiOverviewRow {
    pub query: String,
    pub page: u32,
    pub fetched_at: String,
    pub content_json: String,
}

struct Common {
    query: String,
    page: u32,
    fetched_at: String,
}

fn common(item: &UnifiedItem, fetched_at: &str) -> Common {
    Common {
        query: item.search_query.term.clone(),
        page: item.search_query.page.max(1),
        fetched_at: fetched_at.to_string(),
    }
}

fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Organic rows. Connections already set by normalisation are kept; when
/// absent they are inferred from the result's own text.
pub fn organic_rows(items: &[UnifiedItem], fetched_at: DateTime<Utc>) -> Vec<OrganicRow> {
    let fetched_at = stamp(fetched_at);
    items
        .iter()
        .flat_map(|item| {
            let c = common(item, &fetched_at);
            item.organic_results.iter().map(move |r| {
                let (connections_text, connections_count) = connections(r);
                OrganicRow {
                    query: c.query.clone(),
                    page: c.page,
                    fetched_at: c.fetched_at.clone(),
                    position: r.position,
                    title: r.title.clone().unwrap_or_default(),
                    url: r.url.clone().unwrap_or_default(),
                    displayed_url: r.displayed_url.clone().unwrap_or_default(),
                    snippet: r.snippet.clone().unwrap_or_default(),
                    connections_text,
                    connections_count,
                }
            })
        })
        .collect()
}

fn connections(r: &OrganicResult) -> (Option<String>, Option<u64>) {
    if r.connections_text.is_some() || r.connections_count.is_some() {
        return (r.connections_text.clone(), r.connections_count);
    }
    let mut candidates: Vec<&str> = [&r.snippet, &r.title, &r.displayed_url]
        .into_iter()
        .filter_map(|s| s.as_deref())
        .collect();
    if let Some(tags) = &r.metatags {
        candidates.extend(tags.values().filter_map(Value::as_str));
    }
    match extract_followers_from(candidates.into_iter().map(str::trim).filter(|s| !s.is_empty())) {
        Some(m) => (Some(m.text), m.count),
        None => (None, None),
    }
}

pub fn paa_rows(items: &[UnifiedItem], fetched_at: DateTime<Utc>) -> Vec<PaaRow> {
    let fetched_at = stamp(fetched_at);
    let mut rows = Vec::new();
    for item in items {
        let c = common(item, &fetched_at);
        for p in &item.people_also_ask {
            rows.push(PaaRow {
                query: c.query.clone(),
                page: c.page,
                fetched_at: c.fetched_at.clone(),
                question: p.question.clone().unwrap_or_default(),
                answer: p.answer.clone().unwrap_or_default(),
                url: p.url.clone().unwrap_or_default(),
            });
        }
    }
    rows
}

pub fn related_rows(items: &[UnifiedItem], fetched_at: DateTime<Utc>) -> Vec<RelatedRow> {
    let fetched_at = stamp(fetched_at);
    let mut rows = Vec::new();
    for item in items {
        let c = common(item, &fetched_at);
        for related in &item.related_searches {
            let query = match related {
                Value::Object(map) => map.get("query").and_then(Value::as_str).unwrap_or_default(),
                Value::String(s) => s.as_str(),
                _ => "",
            };
            rows.push(RelatedRow {
                query: c.query.clone(),
                page: c.page,
                fetched_at: c.fetched_at.clone(),
                related_query: query.to_string(),
            });
        }
    }
    rows
}

pub fn ad_rows(items: &[UnifiedItem], fetched_at: DateTime<Utc>) -> Vec<AdRow> {
    let fetched_at = stamp(fetched_at);
    let mut rows = Vec::new();
    for item in items {
        let c = common(item, &fetched_at);
        for ad in &item.ads {
            rows.push(AdRow {
                query: c.query.clone(),
                page: c.page,
                fetched_at: c.fetched_at.clone(),
                position: ad.position,
                title: ad.title.clone().unwrap_or_default(),
                url: ad.url.clone().unwrap_or_default(),
                advertiser: ad.advertiser.clone().unwrap_or_default(),
                snippet: ad.snippet.clone().unwrap_or_default(),
            });
        }
    }
    rows
}

pub fn ai_overview_rows(items: &[UnifiedItem], fetched_at: DateTime<Utc>) -> Vec<AiOverviewRow> {
    let fetched_at = stamp(fetched_at);
    items
        .iter()
        .filter_map(|item| {
            let ai = item.ai_overview.as_ref()?;
            let c = common(item, &fetched_at);
            Some(AiOverviewRow {
                query: c.query,
                page: c.page,
                fetched_at: c.fetched_at,
                content_json: serde_json::to_string(ai).unwrap_or_default(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::{AdItem, PeopleAlsoAskItem};
    use chrono::TimeZone;
    use serde_json::json;
    use serp_cse::SearchQuery;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap()
    }

    fn item(results: Vec<OrganicResult>) -> UnifiedItem {
        UnifiedItem {
            search_query: SearchQuery {
                term: "rust engineer site:linkedin.com/in".into(),
                page: 2,
            },
            organic_results: results,
            ..Default::default()
        }
    }

    #[test]
    fn organic_rows_carry_query_context() {
        let rows = organic_rows(
            &[item(vec![OrganicResult {
                position: Some(11),
                title: Some("Jane Doe".into()),
                url: Some("https://vn.linkedin.com/in/jane".into()),
                connections_text: Some("500+ connections".into()),
                connections_count: Some(500),
                ..Default::default()
            }])],
            at(),
        );
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.query, "rust engineer site:linkedin.com/in");
        assert_eq!(row.page, 2);
        assert_eq!(row.fetched_at, "2024-05-01T08:30:00Z");
        assert_eq!(row.position, Some(11));
        assert_eq!(row.snippet, "");
        assert_eq!(row.connections_count, Some(500));
    }

    #[test]
    fn connections_inferred_when_missing() {
        let rows = organic_rows(
            &[item(vec![OrganicResult {
                title: Some("John Roe".into()),
                snippet: Some("Designer in Hue. 2K followers.".into()),
                ..Default::default()
            }])],
            at(),
        );
        assert_eq!(rows[0].connections_text.as_deref(), Some("2K followers"));
        assert_eq!(rows[0].connections_count, Some(2000));
    }

    #[test]
    fn side_categories_flatten() {
        let unified = UnifiedItem {
            people_also_ask: vec![PeopleAlsoAskItem {
                question: Some("What is Rust?".into()),
                ..Default::default()
            }],
            related_searches: vec![json!({ "query": "rust jobs" }), json!("rust remote"), json!(3)],
            ads: vec![AdItem {
                title: Some("Hire Rust devs".into()),
                ..Default::default()
            }],
            ai_overview: Some(json!({ "text": "Rust is a language" })),
            ..item(vec![])
        };
        let items = [unified, item(vec![])];

        let paa = paa_rows(&items, at());
        assert_eq!(paa.len(), 1);
        assert_eq!(paa[0].answer, "");

        let related: Vec<_> = related_rows(&items, at()).into_iter().map(|r| r.related_query).collect();
        assert_eq!(related, vec!["rust jobs", "rust remote", ""]);

        assert_eq!(ad_rows(&items, at())[0].title, "Hire Rust devs");

        let ai = ai_overview_rows(&items, at());
        assert_eq!(ai.len(), 1);
        assert_eq!(ai[0].content_json, r#"{"text":"Rust is a language"}"#);
    }
}
