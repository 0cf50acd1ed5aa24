//! On-disk response cache.
//!
//! One JSON file per request shape, named by the BLAKE3 digest of the
//! sorted request parameters. Freshness comes from the file modification
//! time. Every failure degrades to a miss (reads) or is dropped (writes):
//! the cache never turns a good request into an error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde_json::Value;
use serp_common::Status;

const CACHE_SUFFIX: &str = ".json";

#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cache identifier for a parameter set; insertion order does not matter.
    ///
    /// ```
    /// use serp_cse::ResponseCache;
    ///
    /// let a = ResponseCache::key(&[("q", "rust".to_string()), ("start", "1".to_string())]);
    /// let b = ResponseCache::key(&[("start", "1".to_string()), ("q", "rust".to_string())]);
    /// assert_eq!(a, b);
    /// assert!(a.ends_with(".json"));
    /// ```
    pub fn key(params: &[(&str, String)]) -> String {
        let sorted: BTreeMap<&str, &str> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        // BTreeMap serializes in key order, giving a stable byte string.
        let payload = serde_json::to_string(&sorted).unwrap_or_default();
        format!("{}{CACHE_SUFFIX}", blake3::hash(payload.as_bytes()).to_hex())
    }

    pub fn read(&self, id: &str) -> Option<Value> {
        self.read_at(id, self.ttl, SystemTime::now())
    }

    /// Read with an explicit TTL and clock. An entry whose age equals `ttl`
    /// is still fresh.
    pub fn read_at(&self, id: &str, ttl: Duration, now: SystemTime) -> Option<Value> {
        let path = self.dir.join(id);
        let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => return None,
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age > ttl {
            tracing::debug!(action = "cache_read", status = %Status::Skipped, id, age_secs = age.as_secs(), "cache entry expired");
            return None;
        }

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::debug!(action = "cache_read", status = %Status::Fail, id, error = %err, "cache read failed");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                tracing::debug!(action = "cache_read", status = %Status::Success, id, "cache hit");
                Some(value)
            }
            Err(err) => {
                tracing::debug!(action = "cache_read", status = %Status::Fail, id, error = %err, "corrupt cache entry treated as miss");
                None
            }
        }
    }

    /// Best-effort write via temp file + rename.
    pub fn write(&self, id: &str, payload: &Value) {
        if let Err(err) = self.try_write(id, payload) {
            tracing::debug!(action = "cache_write", status = %Status::Fail, id, error = %err, "cache write skipped");
        }
    }

    fn try_write(&self, id: &str, payload: &Value) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let bytes = serde_json::to_vec(payload)?;
        let tmp = self
            .dir
            .join(format!(".{id}.{}.tmp", uuid::Uuid::new_v4().simple()));
        std::fs::write(&tmp, bytes)?;
        if let Err(err) = std::fs::rename(&tmp, self.dir.join(id)) {
            let _ = std::fs::remove_file(&tmp);
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs::File;
    use std::sync::{Arc, Mutex};
    use std::time::UNIX_EPOCH;
    use tempfile::TempDir;

    fn params(q: &str, start: u32) -> Vec<(&'static str, String)> {
        vec![
            ("key", "AIzaSyExampleExampleExampleExample0".to_string()),
            ("cx", "engine-0123456".to_string()),
            ("q", q.to_string()),
            ("num", "10".to_string()),
            ("start", start.to_string()),
        ]
    }

    #[test]
    fn key_is_pure_function_of_params() {
        let forward = params("rust developer", 1);
        let mut reversed = forward.clone();
        reversed.reverse();
        assert_eq!(ResponseCache::key(&forward), ResponseCache::key(&reversed));

        let id = ResponseCache::key(&forward);
        assert_eq!(id.len(), 64 + CACHE_SUFFIX.len());

        assert_ne!(
            ResponseCache::key(&params("rust developer", 1)),
            ResponseCache::key(&params("rust developer", 11))
        );
        assert_ne!(
            ResponseCache::key(&params("rust developer", 1)),
            ResponseCache::key(&params("go developer", 1))
        );
    }

    #[test]
    fn missing_entry_is_absent() {
        let tmp = TempDir::new().unwrap();
        let cache = ResponseCache::new(tmp.path(), Duration::from_secs(60));
        assert!(cache.read("nope.json").is_none());
    }

    #[test]
    fn write_then_read_roundtrips_and_creates_dir() {
        let tmp = TempDir::new().unwrap();
        let cache = ResponseCache::new(tmp.path().join("nested/cache"), Duration::from_secs(60));
        let id = ResponseCache::key(&params("rust", 1));
        let payload = json!({ "items": [{ "title": "Rust" }] });
        cache.write(&id, &payload);
        assert_eq!(cache.read(&id), Some(payload));
    }

    #[test]
    fn ttl_boundary_is_inclusive() {
        let tmp = TempDir::new().unwrap();
        let ttl = Duration::from_secs(3600);
        let cache = ResponseCache::new(tmp.path(), ttl);
        let id = ResponseCache::key(&params("rust", 1));
        cache.write(&id, &json!({ "items": [] }));

        let written_at = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        File::options()
            .write(true)
            .open(tmp.path().join(&id))
            .unwrap()
            .set_modified(written_at)
            .unwrap();

        assert!(cache.read_at(&id, ttl, written_at + ttl).is_some());
        assert!(
            cache
                .read_at(&id, ttl, written_at + ttl + Duration::from_secs(1))
                .is_none()
        );
        assert!(cache.read_at(&id, ttl, written_at).is_some());
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let tmp = TempDir::new().unwrap();
        let cache = ResponseCache::new(tmp.path(), Duration::from_secs(60));
        std::fs::write(tmp.path().join("bad.json"), b"{ not json").unwrap();

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || writer.clone())
            .finish();
        let hit = tracing::subscriber::with_default(subscriber, || cache.read("bad.json"));
        assert!(hit.is_none());

        let logged = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let event: Value = serde_json::from_str(logged.lines().next().unwrap()).unwrap();
        assert_eq!(event["fields"]["action"], "cache_read");
        assert_eq!(event["fields"]["status"], Status::Fail.as_str());
    }

    #[test]
    fn unwritable_dir_is_swallowed() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        // A regular file where the directory should be.
        let cache = ResponseCache::new(blocker.join("sub"), Duration::from_secs(60));
        cache.write("x.json", &json!({}));
        assert!(cache.read("x.json").is_none());
    }
}
