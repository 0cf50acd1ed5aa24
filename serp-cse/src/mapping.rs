//! Provider item → [`SearchResultEntry`] mapping and quota error parsing.

use serde_json::{Map, Value};

use crate::types::{CseItem, GoogleErrorEnvelope, QuotaInfo, SearchResultEntry};

const ERROR_INFO_TYPE: &str = "type.googleapis.com/google.rpc.ErrorInfo";
const HELP_TYPE: &str = "type.googleapis.com/google.rpc.Help";
const QUOTA_REASONS: &[&str] = &["rateLimitExceeded", "dailyLimitExceeded", "quotaExceeded"];

/// Map one provider item at a 1-based `position`.
pub fn map_item(item: &CseItem, position: u32) -> SearchResultEntry {
    let snippet = item
        .snippet
        .as_deref()
        .filter(|s| !s.is_empty())
        .or(item.html_snippet.as_deref())
        .unwrap_or_default()
        .to_string();

    let (site_links, metatags) = match &item.pagemap {
        Some(pagemap) => (
            pagemap.sitelinkssearchbox.clone(),
            pagemap
                .metatags
                .first()
                .and_then(Value::as_object)
                .filter(|m| !m.is_empty())
                .cloned(),
        ),
        None => (Vec::new(), None),
    };

    SearchResultEntry {
        position,
        title: item.title.clone().unwrap_or_default(),
        url: item.link.clone().unwrap_or_default(),
        displayed_url: item.display_link.clone().unwrap_or_default(),
        snippet: enrich_snippet(snippet, metatags.as_ref()),
        site_links,
        metatags,
    }
}

/// Longest non-empty `og:description` / `twitter:description`, first wins on ties.
pub fn meta_description(metatags: Option<&Map<String, Value>>) -> Option<String> {
    let tags = metatags?;
    ["og:description", "twitter:description"]
        .iter()
        .filter_map(|k| tags.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .fold(None::<&str>, |best, cand| match best {
            Some(b) if b.chars().count() >= cand.chars().count() => Some(b),
            _ => Some(cand),
        })
        .map(str::to_string)
}

/// Replace a truncated or shorter snippet with the page's meta description.
pub fn enrich_snippet(snippet: String, metatags: Option<&Map<String, Value>>) -> String {
    match meta_description(metatags) {
        Some(desc)
            if snippet.contains("...")
                || snippet.contains('…')
                || desc.chars().count() > snippet.chars().count() =>
        {
            desc
        }
        _ => snippet,
    }
}

/// A recognised quota error: message plus structured details.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaFailure {
    pub message: String,
    pub quota: QuotaInfo,
    pub help_links: Vec<String>,
}

/// Parse an HTTP error response as a Google quota error.
///
/// Only 403/429 qualify, taken from the HTTP status or, when a gateway
/// rewrote that, from the envelope's `code`. The body must also carry a
/// quota reason or the `RESOURCE_EXHAUSTED` status.
pub fn parse_quota_error(status: u16, body: &str) -> Option<QuotaFailure> {
    let envelope: GoogleErrorEnvelope = serde_json::from_str(body).ok()?;
    let err = envelope.error;
    let is_quota_status = |code: i64| code == 403 || code == 429;
    if !is_quota_status(i64::from(status)) && !err.code.is_some_and(is_quota_status) {
        return None;
    }

    let reason_match = err
        .errors
        .iter()
        .filter_map(|e| e.reason.as_deref())
        .any(|r| QUOTA_REASONS.contains(&r));
    let exhausted = err.status.as_deref() == Some("RESOURCE_EXHAUSTED");
    if !reason_match && !exhausted {
        return None;
    }

    let mut quota = QuotaInfo::default();
    let mut help_links = Vec::new();
    for detail in &err.details {
        match detail.get("@type").and_then(Value::as_str) {
            Some(ERROR_INFO_TYPE) if quota == QuotaInfo::default() => {
                let meta = detail.get("metadata");
                let field = |name: &str| {
                    meta.and_then(|m| m.get(name))
                        .and_then(|v| match v {
                            Value::String(s) => Some(s.clone()),
                            Value::Null => None,
                            other => Some(other.to_string()),
                        })
                };
                quota = QuotaInfo {
                    quota_limit: field("quota_limit"),
                    quota_limit_value: field("quota_limit_value"),
                    quota_metric: field("quota_metric"),
                    quota_unit: field("quota_unit"),
                    service: field("service"),
                    consumer: field("consumer"),
                };
            }
            Some(HELP_TYPE) => {
                if let Some(links) = detail.get("links").and_then(Value::as_array) {
                    help_links.extend(
                        links
                            .iter()
                            .filter_map(|l| l.get("url").and_then(Value::as_str))
                            .map(str::to_string),
                    );
                }
            }
            _ => {}
        }
    }

    Some(QuotaFailure {
        message: err
            .message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "Google CSE daily query limit has been reached".to_string()),
        quota,
        help_links,
    })
}
