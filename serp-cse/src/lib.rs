//! Google Custom Search JSON API client.
//!
//! - [`CseClient`]: paginated organic search with caching and quota fallback
//! - [`CredentialManager`]: primary/backup credentials and exhaustion tracking
//! - [`ResponseCache`]: on-disk, TTL-bounded response cache
//! - [`UsageTracker`]: persistent daily request budget
//!
//! Results come back as [`RawResultItem`]s, one per fetched page, in the
//! shape the rest of the pipeline normalizes.

pub mod cache;
pub mod client;
pub mod credentials;
pub mod error;
pub mod mapping;
pub mod types;
pub mod usage;

pub use cache::ResponseCache;
pub use client::{CseClient, CseSettings, MAX_RESULTS_PER_PAGE, SearchBackend};
pub use credentials::{
    CredentialKind, CredentialManager, CredentialRejected, CredentialSource, CredentialStatus,
    KindStatus,
};
pub use error::CseError;
pub use mapping::{QuotaFailure, parse_quota_error};
pub use types::{
    CseItem, CseResponse, QuotaInfo, RawResultItem, SearchInformation, SearchQuery,
    SearchResultEntry,
};
pub use usage::{UsageSnapshot, UsageTracker};
