//! Loader for workspace configuration with YAML + environment overlays.
//!
//! Sources are merged in order: YAML files and inline snippets first, then
//! `SERP__`-prefixed environment variables (`SERP__SEARCH__MAX_PAGES=3`
//! overrides `search.max_pages`). String values are expanded recursively for
//! `${VAR}` placeholders before the typed structs are materialised, and every
//! section falls back to defaults when absent, so an empty source set yields a
//! usable [`SerpConfig`].
//!
//! ```yaml
//! google:
//!   api_key: "${GOOGLE_API_KEY}"
//!   cx: "0123456789abcdef:xyz"
//!   backup_api_key: "${GOOGLE_API_KEY_BACKUP}"
//! search:
//!   max_pages: 2
//!   profile_sites: ["site:linkedin.com/in"]
//! caching:
//!   ttl_seconds: 3600
//! ```
use config::{Config, ConfigError, Environment, File, FileFormat, Source};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

const MAXIMUM_ENV_EXPANSION_DEPTH: usize = 8;

pub const API_KEY_ENV: &str = "GOOGLE_API_KEY";
pub const CX_ENV: &str = "GOOGLE_CSE_CX";
pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/customsearch/v1";

const APP_DIR: &str = "serp";
const ENV_PREFIX: &str = "SERP";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SerpConfig {
    #[serde(default)]
    pub google: GoogleConfig,
    #[serde(default)]
    pub search: SearchDefaults,
    #[serde(default)]
    pub behavior: BehaviorConfig,
    #[serde(default)]
    pub caching: CachingConfig,
    #[serde(default)]
    pub usage: UsageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Credential store, usage counter and query log live here.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

/// Custom Search credentials and request shaping.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GoogleConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub cx: Option<String>,
    #[serde(default)]
    pub backup_api_key: Option<String>,
    #[serde(default)]
    pub backup_cx: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Send `lr`/`gl` hints built from `language`/`country`.
    #[serde(default)]
    pub apply_locale_hints: bool,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            cx: None,
            backup_api_key: None,
            backup_cx: None,
            base_url: default_base_url(),
            apply_locale_hints: false,
            country: None,
            language: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchDefaults {
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_results_per_page")]
    pub results_per_page: u32,
    #[serde(default)]
    pub profile_sites: Vec<String>,
    #[serde(default = "default_true")]
    pub include_organic: bool,
    #[serde(default)]
    pub include_paa: bool,
    #[serde(default)]
    pub include_related: bool,
    #[serde(default)]
    pub include_ads: bool,
    #[serde(default)]
    pub include_ai_overview: bool,
    #[serde(default)]
    pub allow_duplicates: bool,
    #[serde(default)]
    pub split_long_queries: bool,
}

impl Default for SearchDefaults {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            results_per_page: default_results_per_page(),
            profile_sites: Vec::new(),
            include_organic: true,
            include_paa: false,
            include_related: false,
            include_ads: false,
            include_ai_overview: false,
            allow_duplicates: false,
            split_long_queries: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BehaviorConfig {
    /// Pause after each fetch and between keywords.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
            max_retries: default_max_retries(),
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CachingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
}

impl Default for CachingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            ttl_seconds: default_ttl_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UsageConfig {
    #[serde(default = "default_daily_quota")]
    pub daily_quota: u32,
    #[serde(default)]
    pub storage_path: Option<PathBuf>,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            daily_quota: default_daily_quota(),
            storage_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// `text` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_true")]
    pub stderr: bool,
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            format: default_log_format(),
            stderr: true,
            level: default_log_level(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}
fn default_max_pages() -> u32 {
    1
}
fn default_results_per_page() -> u32 {
    10
}
fn default_true() -> bool {
    true
}
fn default_delay_ms() -> u64 {
    1000
}
fn default_max_retries() -> usize {
    2
}
fn default_timeout_secs() -> u64 {
    15
}
fn default_ttl_seconds() -> u64 {
    24 * 60 * 60
}
fn default_daily_quota() -> u32 {
    100
}
fn default_log_format() -> String {
    "text".into()
}
fn default_log_level() -> String {
    "info".into()
}

impl SerpConfig {
    /// Directory holding mutable state; `state_dir` wins over the platform default.
    pub fn resolve_state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.state_dir {
            return expand_path(dir);
        }
        dirs::data_local_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from(".").join(format!(".{APP_DIR}")))
    }

    pub fn resolve_cache_dir(&self) -> PathBuf {
        if let Some(dir) = &self.caching.dir {
            return expand_path(dir);
        }
        dirs::cache_dir()
            .map(|d| d.join(APP_DIR).join("responses"))
            .unwrap_or_else(|| self.resolve_state_dir().join("cache"))
    }

    pub fn resolve_usage_path(&self) -> PathBuf {
        match &self.usage.storage_path {
            Some(path) => expand_path(path),
            None => self.resolve_state_dir().join("usage.json"),
        }
    }

    pub fn credentials_store_path(&self) -> PathBuf {
        self.resolve_state_dir().join("credentials.json")
    }

    pub fn queries_log_path(&self) -> PathBuf {
        self.resolve_state_dir().join("queries.jsonl")
    }

    /// Fill empty primaries from `GOOGLE_API_KEY` / `GOOGLE_CSE_CX` and drop
    /// blank strings so callers only ever see `Some(non_empty)`.
    fn apply_env_credentials(&mut self) {
        let g = &mut self.google;
        for slot in [
            &mut g.api_key,
            &mut g.cx,
            &mut g.backup_api_key,
            &mut g.backup_cx,
            &mut g.country,
            &mut g.language,
        ] {
            if slot.as_deref().is_some_and(|s| s.trim().is_empty()) {
                *slot = None;
            }
        }
        if g.api_key.is_none() {
            g.api_key = non_empty_env(API_KEY_ENV);
        }
        if g.cx.is_none() {
            g.cx = non_empty_env(CX_ENV);
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn expand_path(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) => match shellexpand::full(s) {
            Ok(expanded) => PathBuf::from(expanded.into_owned()),
            Err(_) => path.to_path_buf(),
        },
        None => path.to_path_buf(),
    }
}

/// Expand `${VAR}` references until the text stops changing, so variables
/// whose values reference other variables resolve fully. Cycles stop at the
/// depth cap with the last expansion kept.
fn expand_str(raw: &str) -> String {
    let mut current = raw.to_string();
    for _ in 0..MAXIMUM_ENV_EXPANSION_DEPTH {
        let Ok(next) = shellexpand::env(&current) else {
            break;
        };
        if next == current {
            break;
        }
        current = next.into_owned();
    }
    current
}

fn expand_env_in_value(value: &mut Value) {
    match value {
        Value::String(s) if s.contains('$') => *s = expand_str(s),
        Value::Array(items) => items.iter_mut().for_each(expand_env_in_value),
        Value::Object(fields) => fields.values_mut().for_each(expand_env_in_value),
        _ => {}
    }
}

/// Builder hides the `config` crate wiring (YAML + env overrides).
pub struct SerpConfigLoader {
    builder: config::ConfigBuilder<config::builder::DefaultState>,
}

impl Default for SerpConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl SerpConfigLoader {
    /// Start from an empty source set; `load` layers `SERP__` env overrides last.
    ///
    /// ```
    /// use serp_config::SerpConfigLoader;
    ///
    /// let config = SerpConfigLoader::new()
    ///     .with_yaml_str("search:\n  max_pages: 3")
    ///     .load()
    ///     .expect("valid config");
    ///
    /// assert_eq!(config.search.max_pages, 3);
    /// assert_eq!(config.search.results_per_page, 10);
    /// assert_eq!(config.behavior.delay_ms, 1000);
    /// ```
    pub fn new() -> Self {
        Self {
            builder: Config::builder(),
        }
    }

    fn source<S: Source + Send + Sync + 'static>(mut self, source: S) -> Self {
        self.builder = self.builder.add_source(source);
        self
    }

    /// Add a config file; the format follows the extension. Missing files fail `load`.
    pub fn with_file<P: AsRef<Path>>(self, path: P) -> Self {
        self.source(File::from(path.as_ref()).required(true))
    }

    /// Like [`with_file`](Self::with_file) but a missing file is skipped.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Self {
        self.source(File::from(path.as_ref()).required(false))
    }

    /// Allow tests/CLI to merge inline YAML snippets.
    ///
    /// ```
    /// use serp_config::SerpConfigLoader;
    ///
    /// let cfg = SerpConfigLoader::new()
    ///     .with_yaml_str(
    ///         r#"
    /// google:
    ///   cx: "0123456789:abcdefghij"
    ///   apply_locale_hints: true
    ///   language: "vi"
    /// caching:
    ///   enabled: false
    /// "#,
    ///     )
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(cfg.google.cx.as_deref(), Some("0123456789:abcdefghij"));
    /// assert!(cfg.google.apply_locale_hints);
    /// assert!(!cfg.caching.enabled);
    /// assert_eq!(cfg.caching.ttl_seconds, 86_400);
    /// ```
    pub fn with_yaml_str(self, yaml: &str) -> Self {
        self.source(File::from_str(yaml, FileFormat::Yaml))
    }

    /// Consume the builder and deserialize the merged sources into strongly typed config.
    ///
    /// ```
    /// use serp_config::SerpConfigLoader;
    ///
    /// unsafe { std::env::set_var("SERP_DOCTEST_KEY", "AIzaSyInjectedFromEnvironment000000"); }
    ///
    /// let config = SerpConfigLoader::new()
    ///     .with_yaml_str(r#"
    /// google:
    ///   api_key: "${SERP_DOCTEST_KEY}"
    /// "#)
    ///     .load()
    ///     .expect("valid configuration");
    ///
    /// assert_eq!(
    ///     config.google.api_key.as_deref(),
    ///     Some("AIzaSyInjectedFromEnvironment000000")
    /// );
    /// assert_eq!(config.google.base_url, "https://www.googleapis.com/customsearch/v1");
    ///
    /// unsafe { std::env::remove_var("SERP_DOCTEST_KEY"); }
    /// ```
    pub fn load(self) -> Result<SerpConfig, ConfigError> {
        let env = Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true);
        let mut raw: Value = self.builder.add_source(env).build()?.try_deserialize()?;
        expand_env_in_value(&mut raw);

        let mut config: SerpConfig =
            serde_json::from_value(raw).map_err(|e| ConfigError::Message(e.to_string()))?;
        config.apply_env_credentials();
        Ok(config)
    }
}
