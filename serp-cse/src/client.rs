//! Custom Search client: pagination, caching and quota fallback.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use serp_common::{Status, mask_secret};
use serp_config::{DEFAULT_BASE_URL, SerpConfig};
use serp_http::{Auth, HttpClient, HttpError, RequestOpts};

use crate::cache::ResponseCache;
use crate::credentials::{CredentialKind, CredentialManager};
use crate::error::CseError;
use crate::mapping::{QuotaFailure, map_item, parse_quota_error};
use crate::types::{CseResponse, RawResultItem};
use crate::usage::UsageTracker;

/// Provider limit on results per request.
pub const MAX_RESULTS_PER_PAGE: u32 = 10;

/// Anything that can answer a paginated organic search.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Whether credentials are present; unconfigured backends are skipped.
    fn is_configured(&self) -> bool;

    /// One [`RawResultItem`] per fetched page, positions continuous across pages.
    async fn search(
        &self,
        query: &str,
        max_pages: u32,
        results_per_page: u32,
    ) -> Result<Vec<RawResultItem>, CseError>;
}

#[derive(Debug, Clone)]
pub struct CseSettings {
    pub base_url: String,
    pub timeout: Duration,
    /// Retries for network errors and 5xx. 429 is never retried here.
    pub max_retries: usize,
    pub apply_locale_hints: bool,
    pub country: Option<String>,
    pub language: Option<String>,
}

impl Default for CseSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(15),
            max_retries: 2,
            apply_locale_hints: false,
            country: None,
            language: None,
        }
    }
}

impl CseSettings {
    pub fn from_config(config: &SerpConfig) -> Self {
        Self {
            base_url: config.google.base_url.clone(),
            timeout: Duration::from_secs(config.behavior.request_timeout_secs),
            max_retries: config.behavior.max_retries,
            apply_locale_hints: config.google.apply_locale_hints,
            country: config.google.country.clone(),
            language: config.google.language.clone(),
        }
    }
}

/// Result of one upstream page request. Quota exhaustion is an expected
/// outcome that drives the backup switch, not an error.
#[derive(Debug)]
enum PageOutcome {
    Page(Value),
    Quota(QuotaFailure),
}

pub struct CseClient {
    http: HttpClient,
    settings: CseSettings,
    credentials: Arc<CredentialManager>,
    cache: Option<ResponseCache>,
    usage: Option<Arc<UsageTracker>>,
}

impl CseClient {
    pub fn new(
        settings: CseSettings,
        credentials: Arc<CredentialManager>,
        cache: Option<ResponseCache>,
        usage: Option<Arc<UsageTracker>>,
    ) -> Result<Self, CseError> {
        let http = HttpClient::new(&settings.base_url)
            .map_err(|e| CseError::Request(e.to_string()))?
            .with_timeout(settings.timeout)
            .with_retries(settings.max_retries);
        Ok(Self {
            http,
            settings,
            credentials,
            cache,
            usage,
        })
    }

    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.get(CredentialKind::ApiKey).is_some()
            && self.credentials.get(CredentialKind::EngineId).is_some()
    }

    /// Paginate `query`, stopping on an empty page or once the reported
    /// total is reached.
    pub async fn search(
        &self,
        query: &str,
        max_pages: u32,
        results_per_page: u32,
    ) -> Result<Vec<RawResultItem>, CseError> {
        if !self.is_configured() {
            return Err(CseError::NotConfigured(
                "API key and search engine id are required".into(),
            ));
        }

        let per_page = results_per_page.clamp(1, MAX_RESULTS_PER_PAGE);
        let pages = max_pages.max(1);
        let mut out = Vec::new();
        let mut fetched: u64 = 0;

        for page in 1..=pages {
            let start = (page - 1) * per_page + 1;
            let resp = self.fetch_page(query, per_page, start).await?;
            let total = resp.total_results();

            tracing::debug!(
                action = "cse_pagination",
                keyword = %query,
                page,
                items_count = resp.items.len(),
                start_index = start,
                results_per_page = per_page,
                max_pages = pages,
                total_available = ?total,
                "page fetched"
            );

            let results = resp
                .items
                .iter()
                .enumerate()
                .map(|(idx, item)| map_item(item, (page - 1) * per_page + idx as u32 + 1))
                .collect::<Vec<_>>();
            let count = results.len();
            out.push(RawResultItem::organic(query, page, results));
            fetched += count as u64;

            if count == 0 {
                tracing::debug!(action = "cse_pagination", keyword = %query, page, "no more items, stopping");
                break;
            }
            if let Some(total) = total {
                if fetched >= total {
                    tracing::debug!(action = "cse_pagination", keyword = %query, total, "reached total available results");
                    break;
                }
            }
        }

        tracing::info!(
            action = "cse_pagination_summary",
            status = %Status::Success,
            keyword = %query,
            pages = out.len(),
            total_results = fetched,
            results_per_page = per_page,
            requested_max_pages = max_pages,
            "pagination complete"
        );
        Ok(out)
    }

    fn build_params(&self, api_key: &str, cx: &str, query: &str, per_page: u32, start: u32) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("key", api_key.to_string()),
            ("cx", cx.to_string()),
            ("q", query.to_string()),
            ("num", per_page.to_string()),
            ("start", start.to_string()),
        ];
        if self.settings.apply_locale_hints {
            if let Some(lang) = self.settings.language.as_deref().filter(|l| !l.is_empty()) {
                params.push(("lr", format!("lang_{}", lang.to_lowercase())));
            }
            if let Some(country) = self.settings.country.as_deref().filter(|c| !c.is_empty()) {
                params.push(("gl", country.to_lowercase()));
            }
        }
        params
    }

    fn active_credentials(&self) -> Result<(String, String), CseError> {
        let key = self
            .credentials
            .get(CredentialKind::ApiKey)
            .ok_or_else(|| CseError::NotConfigured("missing API key".into()))?;
        let cx = self
            .credentials
            .get(CredentialKind::EngineId)
            .ok_or_else(|| CseError::NotConfigured("missing search engine id".into()))?;
        Ok((key, cx))
    }

    /// Cache-or-fetch one page, with a single retry on the backup key after
    /// a quota error.
    async fn fetch_page(&self, query: &str, per_page: u32, start: u32) -> Result<CseResponse, CseError> {
        let (api_key, cx) = self.active_credentials()?;
        let params = self.build_params(&api_key, &cx, query, per_page, start);
        let cache_id = ResponseCache::key(&params);

        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.read(&cache_id) {
                match serde_json::from_value::<CseResponse>(cached) {
                    Ok(resp) => return Ok(resp),
                    Err(err) => {
                        tracing::debug!(action = "cache_read", status = %Status::Fail, error = %err, "cached payload has unexpected shape");
                    }
                }
            }
        }

        let failure = match self.request_page(&params).await? {
            PageOutcome::Page(value) => return self.accept(&cache_id, value),
            PageOutcome::Quota(failure) => failure,
        };

        self.credentials.mark_exhausted(CredentialKind::ApiKey, &api_key);
        match self.credentials.switch_to_backup(CredentialKind::ApiKey) {
            Ok(message) => {
                tracing::info!(action = "backup_token_switch", status = %Status::Success, %message, "retrying with backup API key");
                let (backup_key, cx) = self.active_credentials()?;
                let retry_params = self.build_params(&backup_key, &cx, query, per_page, start);
                let retry_id = ResponseCache::key(&retry_params);
                match self.request_page(&retry_params).await {
                    Ok(PageOutcome::Page(value)) => self.accept(&retry_id, value),
                    Ok(PageOutcome::Quota(retry_failure)) => {
                        self.credentials.mark_exhausted(CredentialKind::ApiKey, &backup_key);
                        Err(self.quota_error(retry_failure, &backup_key))
                    }
                    Err(CseError::Upstream { .. }) => Err(self.quota_error(failure, &backup_key)),
                    Err(other) => Err(other),
                }
            }
            Err(rejected) => {
                tracing::warn!(action = "backup_token_switch", status = %Status::Fail, reason = %rejected, "no usable backup API key");
                Err(self.quota_error(failure, &api_key))
            }
        }
    }

    fn accept(&self, cache_id: &str, value: Value) -> Result<CseResponse, CseError> {
        let resp = serde_json::from_value::<CseResponse>(value.clone())
            .map_err(|e| CseError::InvalidResponse(e.to_string()))?;
        if let Some(cache) = &self.cache {
            cache.write(cache_id, &value);
        }
        Ok(resp)
    }

    fn quota_error(&self, failure: QuotaFailure, current_key: &str) -> CseError {
        let q = &failure.quota;
        tracing::warn!(
            action = "quota_exceeded",
            status = %Status::Fail,
            message = %failure.message,
            quota_limit = ?q.quota_limit_value,
            quota_metric = ?q.quota_metric,
            quota_unit = ?q.quota_unit,
            service = ?q.service,
            consumer = ?q.consumer,
            backup_available = self.credentials.available(CredentialKind::ApiKey).is_some(),
            current_api_key = %mask_secret(current_key),
            help_links = ?failure.help_links,
            "Google CSE quota exceeded"
        );
        CseError::QuotaExceeded {
            message: failure.message,
            quota: failure.quota,
            help_links: failure.help_links,
        }
    }

    /// One real upstream request. Counts against the daily budget.
    async fn request_page(&self, params: &[(&'static str, String)]) -> Result<PageOutcome, CseError> {
        if let Some(usage) = &self.usage {
            usage.try_acquire()?;
        }

        let mut key: Option<&str> = None;
        let mut query: Vec<(&str, Cow<'_, str>)> = Vec::with_capacity(params.len());
        for (name, value) in params {
            if *name == "key" {
                key = Some(value.as_str());
            } else {
                query.push((*name, Cow::Borrowed(value.as_str())));
            }
        }
        let opts = RequestOpts {
            auth: key.map(|k| Auth::Query {
                name: "key",
                value: Cow::Borrowed(k),
            }),
            query: Some(query),
            fail_fast_on_429: true,
            ..Default::default()
        };

        let started = Instant::now();
        tracing::debug!(action = "cse_request", status = %Status::Started, "sending request to Google CSE");
        match self.http.get_json::<Value>("", opts).await {
            Ok(value) => {
                tracing::debug!(
                    action = "cse_request",
                    status = %Status::Success,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Google CSE responded"
                );
                Ok(PageOutcome::Page(value))
            }
            Err(HttpError::Api { status, body, message, .. }) => {
                let code = status.as_u16();
                if let Some(failure) = parse_quota_error(code, &body) {
                    return Ok(PageOutcome::Quota(failure));
                }
                tracing::warn!(action = "cse_error", status = %Status::Fail, status_code = code, %message, "Google CSE API error");
                Err(CseError::Upstream { status: code, body })
            }
            Err(HttpError::Network(msg)) => {
                tracing::error!(action = "cse_network", status = %Status::Fail, error = %msg, "Google CSE network error");
                Err(CseError::Network(msg))
            }
            Err(HttpError::Decode(msg, snippet)) => Err(CseError::InvalidResponse(format!("{msg}: {snippet}"))),
            Err(err @ (HttpError::Url(_) | HttpError::Build(_))) => Err(CseError::Request(err.to_string())),
        }
    }
}

#[async_trait]
impl SearchBackend for CseClient {
    fn is_configured(&self) -> bool {
        CseClient::is_configured(self)
    }

    async fn search(
        &self,
        query: &str,
        max_pages: u32,
        results_per_page: u32,
    ) -> Result<Vec<RawResultItem>, CseError> {
        CseClient::search(self, query, max_pages, results_per_page).await
    }
}
