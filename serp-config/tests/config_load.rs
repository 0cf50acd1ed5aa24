use serp_config::SerpConfigLoader;
use serial_test::serial;
use std::{fs, path::PathBuf};
use tempfile::TempDir;

/// Helper to write a YAML file in a temp dir and return its path.
fn write_yaml(tmp: &TempDir, name: &str, yaml: &str) -> PathBuf {
    let p = tmp.path().join(name);
    fs::write(&p, yaml).expect("write yaml");
    p
}

#[test]
#[serial]
fn test_config_load() {
    let tmp = TempDir::new().unwrap();

    let file_yaml = r#"
google:
  api_key: "${SERP_TEST_PRIMARY_KEY}"
  cx: "0123456789:abcdefghij"
  backup_api_key: "${SERP_TEST_BACKUP_KEY}"
  apply_locale_hints: true
  country: vn
  language: vi
search:
  max_pages: 2
  results_per_page: 5
  profile_sites:
    - "site:linkedin.com/in"
    - "site:github.com"
behavior:
  delay_ms: 0
caching:
  ttl_seconds: 60
usage:
  daily_quota: 250
logging:
  format: json
"#;
    let p = write_yaml(&tmp, "serp.yaml", file_yaml);

    temp_env::with_vars(
        [
            ("SERP_TEST_PRIMARY_KEY", Some("AIzaPrimaryPrimaryPrimaryPrimary00")),
            ("SERP_TEST_BACKUP_KEY", Some("AIzaBackupBackupBackupBackupBack00")),
        ],
        || {
            let config = SerpConfigLoader::new()
                .with_file(&p)
                .load()
                .expect("load serp config");

            assert_eq!(
                config.google.api_key.as_deref(),
                Some("AIzaPrimaryPrimaryPrimaryPrimary00")
            );
            assert_eq!(
                config.google.backup_api_key.as_deref(),
                Some("AIzaBackupBackupBackupBackupBack00")
            );
            assert!(config.google.backup_cx.is_none());
            assert_eq!(config.google.language.as_deref(), Some("vi"));
            assert_eq!(config.search.max_pages, 2);
            assert_eq!(config.search.results_per_page, 5);
            assert_eq!(config.search.profile_sites.len(), 2);
            assert!(config.search.include_organic);
            assert_eq!(config.behavior.delay_ms, 0);
            assert_eq!(config.behavior.max_retries, 2);
            assert_eq!(config.caching.ttl_seconds, 60);
            assert!(config.caching.enabled);
            assert_eq!(config.usage.daily_quota, 250);
            assert_eq!(config.logging.format, "json");
        },
    );
}

#[test]
#[serial]
fn env_overrides_file_values() {
    let tmp = TempDir::new().unwrap();
    let p = write_yaml(&tmp, "serp.yaml", "search:\n  max_pages: 1\n");

    temp_env::with_vars(
        [
            ("SERP__SEARCH__MAX_PAGES", Some("4")),
            ("SERP__BEHAVIOR__DELAY_MS", Some("250")),
        ],
        || {
            let config = SerpConfigLoader::new()
                .with_file(&p)
                .load()
                .expect("load serp config");
            assert_eq!(config.search.max_pages, 4);
            assert_eq!(config.behavior.delay_ms, 250);
        },
    );
}

#[test]
#[serial]
fn google_env_vars_fill_missing_primaries() {
    temp_env::with_vars(
        [
            ("GOOGLE_API_KEY", Some("AIzaEnvironmentKeyEnvironmentKey00")),
            ("GOOGLE_CSE_CX", Some("env-engine-0123")),
        ],
        || {
            let config = SerpConfigLoader::new()
                .with_yaml_str("google:\n  api_key: \"\"\n")
                .load()
                .expect("load serp config");
            assert_eq!(
                config.google.api_key.as_deref(),
                Some("AIzaEnvironmentKeyEnvironmentKey00")
            );
            assert_eq!(config.google.cx.as_deref(), Some("env-engine-0123"));
        },
    );
}

#[test]
#[serial]
fn missing_optional_file_yields_defaults() {
    let tmp = TempDir::new().unwrap();
    temp_env::with_vars(
        [("GOOGLE_API_KEY", None::<&str>), ("GOOGLE_CSE_CX", None::<&str>)],
        || {
            let config = SerpConfigLoader::new()
                .with_optional_file(tmp.path().join("absent.yaml"))
                .load()
                .expect("defaults load");
            assert!(config.google.api_key.is_none());
            assert_eq!(config.search.max_pages, 1);
            assert_eq!(config.usage.daily_quota, 100);
            assert!(config.logging.stderr);
        },
    );
}

#[test]
#[serial]
fn missing_required_file_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let result = SerpConfigLoader::new()
        .with_file(tmp.path().join("absent.yaml"))
        .load();
    assert!(result.is_err());
}
