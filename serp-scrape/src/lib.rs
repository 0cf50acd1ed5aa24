//! Batch scraping pipeline on top of the search client.
//!
//! - [`Scraper`]: per-keyword query preparation, fetch, deduplication
//! - [`plan_batch`]: input filtering and the query log
//! - [`normalizer`]: raw page items → [`UnifiedItem`]
//! - [`export`]: flat rows for JSONL/CSV
//! - [`followers`]: follower/connection counts from profile text

pub mod config;
pub mod error;
pub mod export;
pub mod followers;
pub mod normalizer;
pub mod orchestrator;
pub mod plan;

pub use config::SearchConfig;
pub use error::ScrapeError;
pub use followers::{FollowerMatch, extract_followers};
pub use normalizer::{UnifiedItem, normalize, normalize_all, normalize_value};
pub use orchestrator::{BatchReport, KeywordReport, Scraper, ScraperSettings};
pub use plan::{BatchPlan, QueryLogEntry, plan_batch};
