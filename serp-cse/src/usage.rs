//! Daily request budget for real upstream calls.
//!
//! State lives in a small JSON file (`{"date":"YYYY-MM-DD","used":N,"quota":N}`)
//! and resets when the stored date is not today in local time. Cache hits
//! never reach the tracker.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use serde::{Deserialize, Serialize};
use serp_common::Status;

use crate::error::CseError;

pub const DEFAULT_DAILY_QUOTA: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub date: String,
    pub used: u32,
    pub quota: u32,
}

impl UsageSnapshot {
    pub fn remaining(&self) -> u32 {
        self.quota.saturating_sub(self.used)
    }
}

#[derive(Debug)]
pub struct UsageTracker {
    path: PathBuf,
    daily_quota: u32,
    lock: Mutex<()>,
}

fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

impl UsageTracker {
    /// Open (or create) the usage file. A quota of zero falls back to the default.
    pub fn open(path: impl Into<PathBuf>, daily_quota: u32) -> Self {
        let daily_quota = if daily_quota == 0 {
            DEFAULT_DAILY_QUOTA
        } else {
            daily_quota
        };
        let tracker = Self {
            path: path.into(),
            daily_quota,
            lock: Mutex::new(()),
        };
        if !tracker.path.exists() {
            tracker.write_state(&UsageSnapshot {
                date: today(),
                used: 0,
                quota: daily_quota,
            });
        }
        tracker
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current counters, persisting a date rollover if one happened.
    pub fn snapshot(&self) -> UsageSnapshot {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        self.current_state(&today())
    }

    pub fn remaining(&self) -> u32 {
        self.snapshot().remaining()
    }

    /// Count one real request, refusing once the day's budget is spent.
    pub fn try_acquire(&self) -> Result<UsageSnapshot, CseError> {
        self.try_acquire_on(&today())
    }

    fn try_acquire_on(&self, date: &str) -> Result<UsageSnapshot, CseError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut state = self.current_state(date);
        if state.used >= state.quota {
            tracing::warn!(
                action = "usage_limit",
                status = %Status::Fail,
                used = state.used,
                quota = state.quota,
                "daily request limit reached"
            );
            return Err(CseError::DailyLimitReached {
                used: state.used,
                quota: state.quota,
            });
        }
        state.used += 1;
        self.write_state(&state);
        tracing::info!(
            action = "usage_increment",
            status = %Status::Success,
            used = state.used,
            quota = state.quota,
            "usage incremented"
        );
        Ok(state)
    }

    fn current_state(&self, date: &str) -> UsageSnapshot {
        let stored = self.read_state();
        match stored {
            Some(state) if state.date == date => UsageSnapshot {
                quota: if state.quota == 0 {
                    self.daily_quota
                } else {
                    state.quota
                },
                ..state
            },
            stored => {
                let fresh = UsageSnapshot {
                    date: date.to_string(),
                    used: 0,
                    quota: stored
                        .map(|s| s.quota)
                        .filter(|q| *q > 0)
                        .unwrap_or(self.daily_quota),
                };
                self.write_state(&fresh);
                fresh
            }
        }
    }

    fn read_state(&self) -> Option<UsageSnapshot> {
        let bytes = std::fs::read(&self.path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    fn write_state(&self, state: &UsageSnapshot) {
        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let tmp = self.path.with_extension("tmp");
            std::fs::write(&tmp, serde_json::to_vec(state)?)?;
            std::fs::rename(&tmp, &self.path)
        })();
        if let Err(err) = result {
            tracing::warn!(
                action = "usage_write",
                status = %Status::Fail,
                path = %self.path.display(),
                error = %err,
                "failed to persist usage state"
            );
        }
    }
}
