//! Common types and utilities shared across the Serp crates.
//!
//! This crate holds the structured-logging vocabulary every component emits
//! with, the tracing initialiser used by binaries and tests, and a couple of
//! small helpers for keeping credentials out of logs. It is intentionally
//! lightweight so that every crate can depend on it.
//!
//! # Overview
//!
//! - [`Status`]: the `status` field attached to every structured event
//! - [`observability`]: centralised tracing/logging initialisation
//! - [`mask_secret`]: log-safe rendering of API keys
//!
//! # Examples
//!
//! ```rust
//! use serp_common::{mask_secret, Status};
//!
//! tracing::info!(action = "cse_request", status = %Status::Started, "sending request");
//! assert_eq!(Status::Warning.as_str(), "warning");
//! assert_eq!(mask_secret("AIzaSyExampleExampleExample"), "AIzaSyEx...");
//! ```
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod observability;

/// Outcome tag carried by structured log events (`status=...`).
///
/// Events are always tagged with an `action` name plus one of these values,
/// so downstream sinks can filter a batch run by stage and outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Started,
    Success,
    Fail,
    Warning,
    Skipped,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Started => "started",
            Status::Success => "success",
            Status::Fail => "fail",
            Status::Warning => "warning",
            Status::Skipped => "skipped",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const MASK_VISIBLE_CHARS: usize = 8;

/// Render a credential for logs: the first eight characters followed by `...`.
///
/// Values of eight characters or fewer are fully masked.
pub fn mask_secret(value: &str) -> String {
    let visible: String = value.chars().take(MASK_VISIBLE_CHARS).collect();
    if value.chars().count() <= MASK_VISIBLE_CHARS {
        return "***".to_string();
    }
    format!("{visible}...")
}
