use serp_cse::CseError;
use thiserror::Error;

/// Errors surfaced by the scrape pipeline.
#[derive(Debug, Clone, Error)]
pub enum ScrapeError {
    /// Quota or daily budget exhausted. Stops the whole batch.
    #[error("search quota exhausted: {0}")]
    Quota(#[source] CseError),

    /// Any other search failure. Affects one keyword only.
    #[error("search failed: {0}")]
    Fetch(#[source] CseError),

    #[error("invalid search config: {0}")]
    Config(String),
}

impl ScrapeError {
    pub fn is_quota(&self) -> bool {
        matches!(self, ScrapeError::Quota(_))
    }
}

impl From<CseError> for ScrapeError {
    fn from(err: CseError) -> Self {
        if err.is_quota() {
            ScrapeError::Quota(err)
        } else {
            ScrapeError::Fetch(err)
        }
    }
}
