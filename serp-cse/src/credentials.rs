//! API credential resolution, backup switching and exhaustion tracking.
//!
//! A [`CredentialManager`] is built once per process and shared behind an
//! `Arc`. Each credential kind has a configured primary (file or
//! environment), an optional stored primary (set at runtime, optionally
//! persisted) and an optional backup. Exhaustion is tracked as a set of
//! BLAKE3 digests of `"<kind>:<value>"` and never expires while the
//! process runs, unless [`CredentialManager::clear_exhausted`] is called.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serp_common::{Status, mask_secret};
use serp_config::GoogleConfig;
use thiserror::Error;

const API_KEY_PREFIX: &str = "AIza";
const API_KEY_MIN_LEN: usize = 30;
const ENGINE_ID_MIN_LEN: usize = 10;
const ENGINE_ID_MIN_ALNUM: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CredentialKind {
    #[serde(rename = "google_api_key")]
    ApiKey,
    #[serde(rename = "google_cx")]
    EngineId,
}

impl CredentialKind {
    pub const ALL: [CredentialKind; 2] = [CredentialKind::ApiKey, CredentialKind::EngineId];

    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::ApiKey => "google_api_key",
            CredentialKind::EngineId => "google_cx",
        }
    }

    /// Accepts the storage names plus the short CLI spellings.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "google_api_key" | "api_key" | "api-key" | "key" => Some(CredentialKind::ApiKey),
            "google_cx" | "cx" | "engine_id" | "engine-id" => Some(CredentialKind::EngineId),
            _ => None,
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A credential value was refused or a switch was impossible.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct CredentialRejected {
    pub kind: CredentialKind,
    pub reason: String,
}

impl CredentialRejected {
    fn new(kind: CredentialKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

/// Check a value against the format rules for its kind.
pub fn validate(kind: CredentialKind, value: &str) -> Result<(), CredentialRejected> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CredentialRejected::new(kind, "Token value cannot be empty"));
    }
    match kind {
        CredentialKind::ApiKey => {
            if !value.starts_with(API_KEY_PREFIX) {
                return Err(CredentialRejected::new(
                    kind,
                    format!("Google API key must start with '{API_KEY_PREFIX}'"),
                ));
            }
            if value.chars().count() < API_KEY_MIN_LEN {
                return Err(CredentialRejected::new(
                    kind,
                    format!("Google API key must be at least {API_KEY_MIN_LEN} characters long"),
                ));
            }
        }
        CredentialKind::EngineId => {
            if value.chars().count() < ENGINE_ID_MIN_LEN {
                return Err(CredentialRejected::new(
                    kind,
                    format!("Google CSE ID must be at least {ENGINE_ID_MIN_LEN} characters long"),
                ));
            }
            let alnum = value
                .chars()
                .filter(|c| !matches!(c, ':' | '-' | '_'))
                .filter(|c| c.is_alphanumeric())
                .count();
            if alnum < ENGINE_ID_MIN_ALNUM {
                return Err(CredentialRejected::new(
                    kind,
                    format!(
                        "Google CSE ID must contain at least {ENGINE_ID_MIN_ALNUM} alphanumeric characters"
                    ),
                ));
            }
        }
    }
    Ok(())
}

fn exhaustion_hash(kind: CredentialKind, value: &str) -> String {
    blake3::hash(format!("{}:{}", kind.as_str(), value).as_bytes())
        .to_hex()
        .to_string()
}

/// Where the active value of a kind comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialSource {
    Config,
    Stored,
    Backup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindStatus {
    pub source: Option<CredentialSource>,
    pub active: Option<String>,
    pub active_exhausted: bool,
    pub has_backup: bool,
    pub backup_exhausted: bool,
}

/// Snapshot for `serp credentials status`. Values are masked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialStatus {
    pub api_key: KindStatus,
    pub engine_id: KindStatus,
}

#[derive(Debug, Default)]
struct Slot {
    configured: Option<String>,
    stored: Option<String>,
    backup: Option<String>,
    on_backup: bool,
}

impl Slot {
    fn active(&self) -> Option<(&str, CredentialSource)> {
        if self.on_backup {
            if let Some(b) = self.backup.as_deref() {
                return Some((b, CredentialSource::Backup));
            }
        }
        if let Some(c) = self.configured.as_deref() {
            return Some((c, CredentialSource::Config));
        }
        self.stored.as_deref().map(|s| (s, CredentialSource::Stored))
    }
}

#[derive(Debug, Default)]
struct Inner {
    api_key: Slot,
    engine_id: Slot,
    exhausted: HashSet<String>,
    store_path: Option<PathBuf>,
}

impl Inner {
    fn slot(&self, kind: CredentialKind) -> &Slot {
        match kind {
            CredentialKind::ApiKey => &self.api_key,
            CredentialKind::EngineId => &self.engine_id,
        }
    }

    fn slot_mut(&mut self, kind: CredentialKind) -> &mut Slot {
        match kind {
            CredentialKind::ApiKey => &mut self.api_key,
            CredentialKind::EngineId => &mut self.engine_id,
        }
    }

    fn is_exhausted(&self, kind: CredentialKind, value: &str) -> bool {
        self.exhausted.contains(&exhaustion_hash(kind, value))
    }

    fn mark(&mut self, kind: CredentialKind, value: &str) {
        self.exhausted.insert(exhaustion_hash(kind, value));
        tracing::warn!(
            action = "quota_mark",
            status = %Status::Warning,
            token_type = %kind,
            token = %mask_secret(value),
            "credential marked as quota exceeded"
        );
    }

    fn persist(&self) {
        let Some(path) = &self.store_path else {
            return;
        };
        let mut file = StoreFile::default();
        for kind in CredentialKind::ALL {
            let slot = self.slot(kind);
            if let Some(v) = &slot.stored {
                file.stored.insert(kind, v.clone());
            }
            if let Some(v) = &slot.backup {
                file.backup.insert(kind, v.clone());
            }
        }
        if let Err(err) = write_store(path, &file) {
            tracing::warn!(
                action = "token_store",
                status = %Status::Fail,
                path = %path.display(),
                error = %err,
                "failed to persist credential store"
            );
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    stored: BTreeMap<CredentialKind, String>,
    #[serde(default)]
    backup: BTreeMap<CredentialKind, String>,
}

fn write_store(path: &Path, file: &StoreFile) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(file)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
    }
    std::fs::rename(&tmp, path)
}

fn load_store(path: &Path) -> StoreFile {
    match std::fs::read(path) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(file) => file,
            Err(err) => {
                tracing::warn!(action = "token_load", status = %Status::Warning, path = %path.display(), error = %err, "credential store unreadable, starting empty");
                StoreFile::default()
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => StoreFile::default(),
        Err(err) => {
            tracing::warn!(action = "token_load", status = %Status::Warning, path = %path.display(), error = %err, "credential store unreadable, starting empty");
            StoreFile::default()
        }
    }
}

/// Shared credential state. See the module docs.
#[derive(Debug, Default)]
pub struct CredentialManager {
    inner: Mutex<Inner>,
}

impl CredentialManager {
    /// Manager with explicitly configured primaries (not validated: they
    /// come from the operator's environment).
    pub fn new(api_key: Option<String>, engine_id: Option<String>) -> Self {
        let mut inner = Inner::default();
        inner.api_key.configured = api_key.filter(|v| !v.trim().is_empty());
        inner.engine_id.configured = engine_id.filter(|v| !v.trim().is_empty());
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Primaries and backups from the `google` config section. Invalid
    /// backups are logged and ignored.
    pub fn from_config(google: &GoogleConfig) -> Self {
        let manager = Self::new(google.api_key.clone(), google.cx.clone());
        for (kind, backup) in [
            (CredentialKind::ApiKey, &google.backup_api_key),
            (CredentialKind::EngineId, &google.backup_cx),
        ] {
            if let Some(value) = backup {
                if let Err(rejected) = manager.set_backup(kind, value) {
                    tracing::warn!(action = "backup_token_store", status = %Status::Fail, token_type = %kind, reason = %rejected, "configured backup ignored");
                }
            }
        }
        manager
    }

    /// Load stored primaries and backups from `path` and persist future
    /// changes there. Values already set in memory win over the file.
    pub fn with_store_file(self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file = load_store(&path);
        {
            let mut inner = self.lock();
            for (kind, value) in file.stored {
                let slot = inner.slot_mut(kind);
                if slot.stored.is_none() && validate(kind, &value).is_ok() {
                    slot.stored = Some(value);
                }
            }
            for (kind, value) in file.backup {
                let slot = inner.slot_mut(kind);
                if slot.backup.is_none() && validate(kind, &value).is_ok() {
                    slot.backup = Some(value);
                }
            }
            inner.store_path = Some(path);
        }
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Active value: the backup once switched to, else the configured
    /// primary, else the stored one.
    pub fn get(&self, kind: CredentialKind) -> Option<String> {
        self.lock().slot(kind).active().map(|(v, _)| v.to_string())
    }

    pub fn backup(&self, kind: CredentialKind) -> Option<String> {
        self.lock().slot(kind).backup.clone()
    }

    pub fn has_backup(&self, kind: CredentialKind) -> bool {
        self.lock().slot(kind).backup.is_some()
    }

    /// Store a runtime primary. It never shadows a configured primary.
    pub fn set_primary(&self, kind: CredentialKind, value: &str) -> Result<String, CredentialRejected> {
        validate(kind, value)?;
        let mut inner = self.lock();
        inner.slot_mut(kind).stored = Some(value.trim().to_string());
        inner.persist();
        tracing::info!(action = "token_store", status = %Status::Success, token_type = %kind, "credential stored");
        Ok(format!("{kind} token stored successfully"))
    }

    pub fn set_backup(&self, kind: CredentialKind, value: &str) -> Result<String, CredentialRejected> {
        validate(kind, value)?;
        let mut inner = self.lock();
        inner.slot_mut(kind).backup = Some(value.trim().to_string());
        inner.persist();
        tracing::info!(action = "backup_token_store", status = %Status::Success, token_type = %kind, "backup credential stored");
        Ok(format!("Backup {kind} token stored successfully"))
    }

    pub fn mark_exhausted(&self, kind: CredentialKind, value: &str) {
        self.lock().mark(kind, value);
    }

    pub fn is_exhausted(&self, kind: CredentialKind, value: &str) -> bool {
        self.lock().is_exhausted(kind, value)
    }

    pub fn clear_exhausted(&self) {
        self.lock().exhausted.clear();
    }

    /// First non-exhausted of active, configured/stored primary, backup.
    pub fn available(&self, kind: CredentialKind) -> Option<String> {
        let inner = self.lock();
        let slot = inner.slot(kind);
        let candidates = [
            slot.active().map(|(v, _)| v),
            slot.configured.as_deref(),
            slot.stored.as_deref(),
            slot.backup.as_deref(),
        ];
        candidates
            .into_iter()
            .flatten()
            .find(|v| !inner.is_exhausted(kind, v))
            .map(str::to_string)
    }

    /// Promote the backup after the active credential ran out of quota.
    ///
    /// Fails when no backup exists or when the backup is itself exhausted;
    /// there is no further fallback. Calling it again while already on the
    /// backup succeeds without marking anything.
    pub fn switch_to_backup(&self, kind: CredentialKind) -> Result<String, CredentialRejected> {
        let mut inner = self.lock();
        let Some(backup) = inner.slot(kind).backup.clone() else {
            return Err(CredentialRejected::new(
                kind,
                format!("No backup {kind} token available"),
            ));
        };
        if inner.is_exhausted(kind, &backup) {
            tracing::warn!(action = "backup_token_switch", status = %Status::Fail, token_type = %kind, "backup credential already exhausted");
            return Err(CredentialRejected::new(
                kind,
                format!("Backup {kind} token is also exhausted; no further fallback"),
            ));
        }
        if inner.slot(kind).on_backup {
            return Ok(format!("Already using backup {kind} token"));
        }

        if let Some(current) = inner.slot(kind).active().map(|(v, _)| v.to_string()) {
            if current != backup {
                inner.mark(kind, &current);
            }
        }
        inner.slot_mut(kind).on_backup = true;
        tracing::info!(
            action = "backup_token_switch",
            status = %Status::Success,
            token_type = %kind,
            token = %mask_secret(&backup),
            "switched to backup credential"
        );
        Ok(format!("Switched to backup {kind} token"))
    }

    /// Drop stored primaries and backups (memory and file).
    pub fn clear_store(&self) {
        let mut inner = self.lock();
        for kind in CredentialKind::ALL {
            let slot = inner.slot_mut(kind);
            slot.stored = None;
            slot.backup = None;
            slot.on_backup = false;
        }
        if let Some(path) = inner.store_path.clone() {
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(action = "token_clear", status = %Status::Fail, path = %path.display(), error = %err, "failed to remove credential store");
                }
            }
        }
        tracing::info!(action = "token_clear", status = %Status::Success, "stored credentials cleared");
    }

    pub fn status(&self) -> CredentialStatus {
        let inner = self.lock();
        let kind_status = |kind: CredentialKind| {
            let slot = inner.slot(kind);
            let active = slot.active();
            KindStatus {
                source: active.map(|(_, s)| s),
                active: active.map(|(v, _)| mask_secret(v)),
                active_exhausted: active.is_some_and(|(v, _)| inner.is_exhausted(kind, v)),
                has_backup: slot.backup.is_some(),
                backup_exhausted: slot
                    .backup
                    .as_deref()
                    .is_some_and(|b| inner.is_exhausted(kind, b)),
            }
        };
        CredentialStatus {
            api_key: kind_status(CredentialKind::ApiKey),
            engine_id: kind_status(CredentialKind::EngineId),
        }
    }
}
