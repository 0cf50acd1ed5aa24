//! Per-batch search options.
//!
//! [`SearchConfig`] is built from the `search` section of the loaded
//! configuration and then overridden by command-line flags.

use serde::{Deserialize, Serialize};
use serp_config::SearchDefaults;
use serp_cse::MAX_RESULTS_PER_PAGE;

use crate::error::ScrapeError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Pages fetched per sub-query, at least 1.
    pub max_pages: u32,
    /// Results per page, 1 through 10.
    pub results_per_page: u32,
    pub include_organic: bool,
    pub include_paa: bool,
    pub include_related: bool,
    pub include_ads: bool,
    pub include_ai_overview: bool,
    /// `site:` scopes appended to every query, in order.
    pub profile_sites: Vec<String>,
    pub allow_duplicates: bool,
    pub split_long_queries: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_pages: 1,
            results_per_page: MAX_RESULTS_PER_PAGE,
            include_organic: true,
            include_paa: false,
            include_related: false,
            include_ads: false,
            include_ai_overview: false,
            profile_sites: Vec::new(),
            allow_duplicates: false,
            split_long_queries: false,
        }
    }
}

impl From<&SearchDefaults> for SearchConfig {
    fn from(d: &SearchDefaults) -> Self {
        Self {
            max_pages: d.max_pages,
            results_per_page: d.results_per_page,
            include_organic: d.include_organic,
            include_paa: d.include_paa,
            include_related: d.include_related,
            include_ads: d.include_ads,
            include_ai_overview: d.include_ai_overview,
            profile_sites: d.profile_sites.clone(),
            allow_duplicates: d.allow_duplicates,
            split_long_queries: d.split_long_queries,
        }
    }
}

impl SearchConfig {
    /// Checks:
    /// - `max_pages` must be at least 1
    /// - `results_per_page` must be within 1..=10
    pub fn validate(&self) -> Result<(), ScrapeError> {
        if self.max_pages == 0 {
            return Err(ScrapeError::Config("max_pages must be at least 1".into()));
        }
        if self.results_per_page == 0 || self.results_per_page > MAX_RESULTS_PER_PAGE {
            return Err(ScrapeError::Config(format!(
                "results_per_page must be between 1 and {MAX_RESULTS_PER_PAGE}"
            )));
        }
        Ok(())
    }

    /// Organic results requested and nothing else. The only combination
    /// the search backend can serve.
    pub fn organic_only(&self) -> bool {
        self.include_organic
            && !(self.include_paa || self.include_related || self.include_ads || self.include_ai_overview)
    }
}
