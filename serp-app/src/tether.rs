use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serp_common::Status;
use serp_config::SerpConfig;
use serp_cse::{CredentialManager, CseClient, CseSettings, ResponseCache, UsageTracker};
use serp_scrape::{Scraper, ScraperSettings};
use tokio_util::sync::CancellationToken;

/// Shared services for one CLI invocation, wired from config.
pub struct Tether {
    pub credentials: Arc<CredentialManager>,
    pub usage: Arc<UsageTracker>,
    cache: Option<ResponseCache>,
    settings: CseSettings,
    delay: Duration,
}

impl Tether {
    pub fn from_config(cfg: &SerpConfig) -> Self {
        let credentials = Arc::new(
            CredentialManager::from_config(&cfg.google).with_store_file(cfg.credentials_store_path()),
        );
        let usage = Arc::new(UsageTracker::open(cfg.resolve_usage_path(), cfg.usage.daily_quota));
        let cache = cfg.caching.enabled.then(|| {
            ResponseCache::new(
                cfg.resolve_cache_dir(),
                Duration::from_secs(cfg.caching.ttl_seconds),
            )
        });
        tracing::debug!(
            action = "wire_services",
            status = %Status::Success,
            cache = ?cache.as_ref().map(|c| c.dir().display().to_string()),
            usage = %usage.path().display(),
            "services wired"
        );
        Self {
            credentials,
            usage,
            cache,
            settings: CseSettings::from_config(cfg),
            delay: Duration::from_millis(cfg.behavior.delay_ms),
        }
    }

    pub fn disable_cache(&mut self) {
        self.cache = None;
    }

    pub fn client(&self) -> Result<CseClient> {
        CseClient::new(
            self.settings.clone(),
            self.credentials.clone(),
            self.cache.clone(),
            Some(self.usage.clone()),
        )
        .context("building search client")
    }

    pub fn scraper(&self, cancel: CancellationToken) -> Result<Scraper> {
        let client = self.client()?;
        let settings = ScraperSettings {
            delay: self.delay,
            cancel,
        };
        Ok(Scraper::new(Arc::new(client), settings))
    }
}
