//! Error types for the Custom Search client.

use thiserror::Error;

use crate::types::QuotaInfo;

/// Errors that can occur when fetching from the Custom Search JSON API.
#[derive(Debug, Clone, Error)]
pub enum CseError {
    /// API key or engine id missing.
    #[error("Google CSE is not configured: {0}")]
    NotConfigured(String),

    /// Upstream quota or rate limit hit, after the backup credential (if
    /// any) was tried once.
    #[error("Google CSE quota exceeded: {message}")]
    QuotaExceeded {
        message: String,
        quota: QuotaInfo,
        help_links: Vec<String>,
    },

    /// Non-quota HTTP failure.
    #[error("Google API error: {status} - {body}")]
    Upstream { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response from Google: {0}")]
    InvalidResponse(String),

    /// Local daily request budget is spent.
    #[error("daily request limit reached ({used}/{quota}), try again tomorrow")]
    DailyLimitReached { used: u32, quota: u32 },

    #[error("request could not be built: {0}")]
    Request(String),
}

impl CseError {
    /// True for the errors that must stop a whole batch.
    pub fn is_quota(&self) -> bool {
        matches!(
            self,
            CseError::QuotaExceeded { .. } | CseError::DailyLimitReached { .. }
        )
    }

    /// Short machine-friendly label used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            CseError::NotConfigured(_) => "not_configured",
            CseError::QuotaExceeded { .. } => "quota_exceeded",
            CseError::Upstream { .. } => "upstream",
            CseError::Network(_) => "network",
            CseError::InvalidResponse(_) => "invalid_response",
            CseError::DailyLimitReached { .. } => "daily_limit",
            CseError::Request(_) => "request",
        }
    }
}
