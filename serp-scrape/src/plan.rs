//! Batch planning: blank filtering, cross-keyword deduplication and the
//! per-input query log.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serp_common::Status;

use crate::config::SearchConfig;

/// One line of the query log (`queries.jsonl`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryLogEntry {
    /// 1-based position in the input, blanks included.
    pub input_row_id: usize,
    pub original_input: String,
    /// Cleaned, scope-filtered query that will be sent.
    pub final_query: String,
    pub normalized_query_hash: String,
    pub timestamp: String,
    pub deduplicated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPlan {
    /// Inputs to scrape, in input order.
    pub keywords: Vec<String>,
    /// Inputs dropped because an earlier input had the same dedup key.
    pub skipped_duplicates: Vec<String>,
    /// One entry per non-blank input.
    pub log: Vec<QueryLogEntry>,
}

pub fn plan_batch(keywords: &[String], config: &SearchConfig) -> BatchPlan {
    let mut plan = BatchPlan::default();
    let mut seen = std::collections::HashSet::new();

    for (idx, keyword) in keywords.iter().enumerate() {
        if keyword.trim().is_empty() {
            continue;
        }
        let normalized = serp_query::normalize(keyword, &config.profile_sites);
        let duplicate = !config.allow_duplicates && !seen.insert(normalized.key.clone());
        if duplicate {
            plan.skipped_duplicates.push(keyword.clone());
        } else {
            plan.keywords.push(keyword.clone());
        }
        plan.log.push(QueryLogEntry {
            input_row_id: idx + 1,
            original_input: keyword.clone(),
            final_query: normalized.cleaned,
            normalized_query_hash: serp_query::query_hash(&normalized.key),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            deduplicated: duplicate,
        });
    }

    if !plan.skipped_duplicates.is_empty() {
        tracing::info!(
            action = "dedup",
            status = %Status::Skipped,
            skipped = plan.skipped_duplicates.len(),
            "skipping duplicate queries"
        );
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn drops_blanks_and_duplicates() {
        let config = SearchConfig {
            profile_sites: vec!["site:linkedin.com/in".into()],
            ..Default::default()
        };
        let plan = plan_batch(&inputs(&["Rust Engineer", "  ", "rust   engineer", "go engineer"]), &config);

        assert_eq!(plan.keywords, vec!["Rust Engineer", "go engineer"]);
        assert_eq!(plan.skipped_duplicates, vec!["rust   engineer"]);
        assert_eq!(plan.log.len(), 3);

        let ids: Vec<usize> = plan.log.iter().map(|e| e.input_row_id).collect();
        assert_eq!(ids, vec![1, 3, 4]);
        assert_eq!(plan.log[0].final_query, "Rust Engineer (site:linkedin.com/in)");
        assert!(plan.log[1].deduplicated);
        assert_eq!(plan.log[0].normalized_query_hash, plan.log[1].normalized_query_hash);
        assert_eq!(plan.log[0].normalized_query_hash.len(), 64);
    }

    #[test]
    fn duplicates_kept_when_allowed() {
        let config = SearchConfig {
            allow_duplicates: true,
            ..Default::default()
        };
        let plan = plan_batch(&inputs(&["rust", "RUST"]), &config);
        assert_eq!(plan.keywords.len(), 2);
        assert!(plan.log.iter().all(|e| !e.deduplicated));
    }
}
