//! Keyword → sub-queries → paginated fetch → deduplicated single-result items.
//!
//! A [`Scraper`] processes keywords strictly one after another with a
//! cooperative delay between requests. Quota exhaustion stops the batch;
//! any other failure costs only the keyword it happened on.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serp_common::Status;
use serp_config::SerpConfig;
use serp_cse::{CseError, RawResultItem, SearchBackend};
use tokio_util::sync::CancellationToken;

use crate::config::SearchConfig;
use crate::error::ScrapeError;

#[derive(Debug, Clone)]
pub struct ScraperSettings {
    /// Pause after each fetched sub-query and between keywords.
    pub delay: Duration,
    /// Checked before every keyword and sub-query.
    pub cancel: CancellationToken,
}

impl Default for ScraperSettings {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(1000),
            cancel: CancellationToken::new(),
        }
    }
}

impl ScraperSettings {
    pub fn from_config(config: &SerpConfig) -> Self {
        Self {
            delay: Duration::from_millis(config.behavior.delay_ms),
            ..Default::default()
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Outcome for one input keyword.
#[derive(Debug, Clone, Default, Serialize)]
pub struct KeywordReport {
    pub keyword: String,
    pub final_query: String,
    pub sub_queries: usize,
    /// Sub-queries skipped because the backend cannot serve the request.
    pub skipped_sub_queries: usize,
    pub results: usize,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    /// Kept results across all keywords, input order.
    pub items: Vec<RawResultItem>,
    pub keywords: Vec<KeywordReport>,
    /// Error that stopped the batch early.
    pub halted: Option<ScrapeError>,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn failed_keywords(&self) -> impl Iterator<Item = &KeywordReport> {
        self.keywords.iter().filter(|k| k.error.is_some())
    }
}

type SeenKey = (String, String);

pub struct Scraper {
    backend: Arc<dyn SearchBackend>,
    settings: ScraperSettings,
}

impl Scraper {
    pub fn new(backend: Arc<dyn SearchBackend>, settings: ScraperSettings) -> Self {
        Self { backend, settings }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.settings.cancel
    }

    /// Scrape one keyword. Only quota exhaustion and an invalid config are
    /// errors; other failures are logged and yield no results.
    ///
    /// Results already fetched for the keyword are lost when this returns an
    /// error; use [`Scraper::scrape_many`] to keep them.
    pub async fn scrape_one(&self, keyword: &str, config: &SearchConfig) -> Result<Vec<RawResultItem>, ScrapeError> {
        config.validate()?;
        let mut report = KeywordReport::default();
        match self.run_keyword(keyword, config, &mut report).await {
            (items, None) => Ok(items),
            (_, Some(err @ ScrapeError::Fetch(_))) => {
                tracing::error!(action = "scrape", status = %Status::Fail, keyword, error = %err, "error scraping keyword");
                Ok(Vec::new())
            }
            (_, Some(err)) => Err(err),
        }
    }

    pub async fn scrape_many(&self, keywords: &[String], config: &SearchConfig) -> BatchReport {
        let mut batch = BatchReport::default();
        if let Err(err) = config.validate() {
            batch.halted = Some(err);
            return batch;
        }

        for (idx, keyword) in keywords.iter().enumerate() {
            if self.settings.cancel.is_cancelled() {
                tracing::warn!(action = "scrape_batch", status = %Status::Skipped, remaining = keywords.len() - idx, "batch cancelled");
                batch.cancelled = true;
                break;
            }
            tracing::debug!(action = "scrape_start", status = %Status::Started, keyword = %keyword, "scraping keyword");

            let mut report = KeywordReport {
                keyword: keyword.clone(),
                ..Default::default()
            };
            let (items, error) = self.run_keyword(keyword, config, &mut report).await;
            match error {
                None => {
                    report.results = items.len();
                    batch.items.extend(items);
                    batch.keywords.push(report);
                }
                Some(err) if err.is_quota() => {
                    // Sub-queries fetched before the quota ran out stay in the batch.
                    report.results = items.len();
                    report.error = Some(err.to_string());
                    batch.items.extend(items);
                    batch.keywords.push(report);
                    tracing::error!(action = "scrape_batch", status = %Status::Fail, keyword = %keyword, error = %err, "quota exhausted, stopping batch");
                    batch.halted = Some(err);
                    break;
                }
                Some(err) => {
                    report.error = Some(err.to_string());
                    batch.keywords.push(report);
                    tracing::error!(action = "scrape", status = %Status::Fail, keyword = %keyword, error = %err, "error scraping keyword");
                }
            }

            if idx + 1 < keywords.len() {
                self.pause().await;
            }
        }

        batch.cancelled |= self.settings.cancel.is_cancelled();
        let status = if batch.halted.is_some() {
            Status::Fail
        } else {
            Status::Success
        };
        tracing::info!(
            action = "scrape_batch",
            status = %status,
            keywords = batch.keywords.len(),
            failed = batch.failed_keywords().count(),
            results = batch.items.len(),
            cancelled = batch.cancelled,
            "batch finished"
        );
        batch
    }

    async fn run_keyword(
        &self,
        keyword: &str,
        config: &SearchConfig,
        report: &mut KeywordReport,
    ) -> (Vec<RawResultItem>, Option<ScrapeError>) {
        let final_query = serp_query::apply_scope_filters(&serp_query::clean(keyword), &config.profile_sites);
        tracing::debug!(action = "build_query", status = %Status::Success, keyword = %final_query, "final query computed");
        if keyword != final_query {
            tracing::debug!(action = "query_transform", status = %Status::Success, input = %keyword, keyword = %final_query, "input rewritten");
        }
        report.final_query = final_query.clone();

        let sub_queries = if config.split_long_queries && serp_query::should_split(&final_query) {
            serp_query::split(&final_query)
        } else {
            vec![final_query]
        };
        report.sub_queries = sub_queries.len();

        let mut seen: HashSet<SeenKey> = HashSet::new();
        let mut merged = Vec::new();

        for sub_query in sub_queries {
            if self.settings.cancel.is_cancelled() {
                break;
            }
            let cleaned = serp_query::apply_scope_filters(&serp_query::clean(&sub_query), &config.profile_sites);
            if cleaned != sub_query {
                tracing::debug!(action = "subquery_clean", status = %Status::Success, before = %sub_query, keyword = %cleaned, "sub-query cleaned");
            }

            if !self.backend.is_configured() || !config.organic_only() {
                tracing::warn!(
                    action = "cse_unsupported",
                    status = %Status::Warning,
                    keyword = %cleaned,
                    configured = self.backend.is_configured(),
                    "search backend cannot serve the requested features (PAA, related, ads, AI overview) or is not configured; skipping query"
                );
                report.skipped_sub_queries += 1;
                continue;
            }

            let pages = match self.fetch(&cleaned, config).await {
                Ok(pages) => pages,
                Err(err) => return (merged, Some(err)),
            };
            let before = merged.len();
            keep_new_results(pages, &mut seen, &mut merged);
            tracing::info!(
                action = "result_fetch",
                status = %Status::Success,
                keyword = %cleaned,
                new_results = merged.len() - before,
                total_results = merged.len(),
                "results fetched"
            );
            self.pause().await;
        }
        (merged, None)
    }

    async fn fetch(&self, query: &str, config: &SearchConfig) -> Result<Vec<RawResultItem>, ScrapeError> {
        tracing::debug!(action = "cse_request", status = %Status::Started, keyword = %query, "sending request to search backend");
        match self
            .backend
            .search(query, config.max_pages, config.results_per_page)
            .await
        {
            Ok(pages) => Ok(pages),
            Err(err) => {
                log_fetch_failure(query, &err);
                Err(err.into())
            }
        }
    }

    async fn pause(&self) {
        if self.settings.delay.is_zero() {
            return;
        }
        tokio::select! {
            _ = self.settings.cancel.cancelled() => {}
            _ = tokio::time::sleep(self.settings.delay) => {}
        }
    }
}

fn log_fetch_failure(query: &str, err: &CseError) {
    match err {
        CseError::QuotaExceeded { quota, help_links, .. } => {
            tracing::error!(
                action = "cse_quota",
                status = %Status::Fail,
                keyword = %query,
                quota_info = ?quota,
                help_links = ?help_links,
                error = %err,
                "search quota exceeded"
            );
        }
        _ => {
            tracing::error!(action = "cse_error", status = %Status::Fail, keyword = %query, kind = err.kind(), error = %err, "search request failed");
        }
    }
}

/// Split pages into one item per result, skipping results already seen in
/// this keyword. Results with neither title nor URL are keyed by page and term.
fn keep_new_results(pages: Vec<RawResultItem>, seen: &mut HashSet<SeenKey>, out: &mut Vec<RawResultItem>) {
    for page in pages {
        for result in page.search_results {
            let key = if result.title.is_empty() && result.url.is_empty() {
                (page.search_query.page.to_string(), page.search_query.term.clone())
            } else {
                (result.title.clone(), result.url.clone())
            };
            if seen.insert(key) {
                out.push(RawResultItem {
                    search_query: page.search_query.clone(),
                    search_results: vec![result],
                    ..Default::default()
                });
            }
        }
    }
}
