//! Integration tests for the scrape pipeline.
//!
//! A scripted backend drives the orchestrator without network calls; the
//! last test runs the real search client against a mock upstream.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use serp_cse::{
    CredentialManager, CseClient, CseError, CseSettings, QuotaInfo, RawResultItem, SearchBackend,
    SearchResultEntry,
};
use serp_scrape::{ScrapeError, Scraper, ScraperSettings, SearchConfig, normalize_all};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

type Reply = Result<Vec<RawResultItem>, CseError>;

struct ScriptedBackend {
    configured: bool,
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            configured: true,
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchBackend for ScriptedBackend {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn search(&self, query: &str, _max_pages: u32, _per_page: u32) -> Reply {
        self.calls.lock().unwrap().push(query.to_string());
        self.replies.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()))
    }
}

fn entry(title: &str, url: &str, position: u32) -> SearchResultEntry {
    SearchResultEntry {
        position,
        title: title.into(),
        url: url.into(),
        ..Default::default()
    }
}

fn scraper(backend: Arc<ScriptedBackend>) -> Scraper {
    Scraper::new(
        backend,
        ScraperSettings {
            delay: Duration::ZERO,
            ..Default::default()
        },
    )
}

fn quota() -> CseError {
    CseError::QuotaExceeded {
        message: "Quota exceeded".into(),
        quota: QuotaInfo::default(),
        help_links: vec![],
    }
}

fn keywords(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn dedup_across_sub_queries_keeps_first_occurrences() {
    let long = (1..=15).map(|i| format!("t{i}")).collect::<Vec<_>>().join(" ");
    let backend = ScriptedBackend::new(vec![
        Ok(vec![RawResultItem::organic(
            "first",
            1,
            vec![entry("A", "https://a.example", 1), entry("B", "https://b.example", 2)],
        )]),
        Ok(vec![RawResultItem::organic(
            "second",
            1,
            vec![entry("A", "https://a.example", 1)],
        )]),
    ]);
    let config = SearchConfig {
        split_long_queries: true,
        ..Default::default()
    };

    let items = scraper(backend.clone()).scrape_one(&long, &config).await.unwrap();

    assert_eq!(backend.calls().len(), 3);
    assert_eq!(backend.calls()[0], "t1 t2 t3 t4 t5");
    assert_eq!(items.len(), 2);
    let titles: Vec<&str> = items.iter().map(|i| i.search_results[0].title.as_str()).collect();
    assert_eq!(titles, vec!["A", "B"]);
    assert!(items.iter().all(|i| i.search_query.term == "first"));
}

#[tokio::test]
async fn scope_filters_are_applied_before_fetch() {
    let backend = ScriptedBackend::new(vec![]);
    let config = SearchConfig {
        profile_sites: vec!["site:linkedin.com/in".into()],
        ..Default::default()
    };
    scraper(backend.clone())
        .scrape_one("  (OR rust developer ", &config)
        .await
        .unwrap();
    assert_eq!(backend.calls(), vec!["(rust developer) (site:linkedin.com/in)"]);
}

#[tokio::test]
async fn quota_exhaustion_halts_the_batch() {
    let backend = ScriptedBackend::new(vec![
        Ok(vec![RawResultItem::organic("a", 1, vec![entry("A", "https://a.example", 1)])]),
        Err(quota()),
        Ok(vec![RawResultItem::organic("c", 1, vec![entry("C", "https://c.example", 1)])]),
    ]);

    let report = scraper(backend.clone())
        .scrape_many(&keywords(&["a", "b", "c"]), &SearchConfig::default())
        .await;

    assert_eq!(backend.calls(), vec!["a", "b"]);
    assert_eq!(report.items.len(), 1);
    assert_eq!(report.keywords.len(), 2);
    assert!(matches!(report.halted, Some(ScrapeError::Quota(_))));
    assert!(!report.cancelled);
}

#[tokio::test]
async fn quota_mid_keyword_keeps_earlier_sub_query_results() {
    let long = (1..=15).map(|i| format!("t{i}")).collect::<Vec<_>>().join(" ");
    let backend = ScriptedBackend::new(vec![
        Ok(vec![RawResultItem::organic(
            "t1 t2 t3 t4 t5",
            1,
            vec![entry("A", "https://a.example", 1), entry("B", "https://b.example", 2)],
        )]),
        Err(quota()),
    ]);
    let config = SearchConfig {
        split_long_queries: true,
        ..Default::default()
    };

    let report = scraper(backend.clone())
        .scrape_many(&keywords(&[long.as_str(), "never fetched"]), &config)
        .await;

    assert_eq!(backend.calls().len(), 2);
    assert!(matches!(report.halted, Some(ScrapeError::Quota(_))));
    let titles: Vec<&str> = report
        .items
        .iter()
        .map(|i| i.search_results[0].title.as_str())
        .collect();
    assert_eq!(titles, vec!["A", "B"]);
    assert_eq!(report.keywords.len(), 1);
    assert_eq!(report.keywords[0].results, 2);
    assert!(report.keywords[0].error.is_some());
}

#[tokio::test]
async fn scrape_one_propagates_quota() {
    let backend = ScriptedBackend::new(vec![Err(CseError::DailyLimitReached { used: 100, quota: 100 })]);
    let err = scraper(backend)
        .scrape_one("rust", &SearchConfig::default())
        .await
        .unwrap_err();
    assert!(err.is_quota());
}

#[tokio::test]
async fn other_failures_cost_only_their_keyword() {
    let backend = ScriptedBackend::new(vec![
        Err(CseError::Upstream {
            status: 500,
            body: "backend error".into(),
        }),
        Ok(vec![RawResultItem::organic("b", 1, vec![entry("B", "https://b.example", 1)])]),
    ]);

    let s = scraper(backend.clone());
    let report = s.scrape_many(&keywords(&["a", "b"]), &SearchConfig::default()).await;
    assert!(report.halted.is_none());
    assert_eq!(report.items.len(), 1);
    let failed: Vec<&str> = report.failed_keywords().map(|k| k.keyword.as_str()).collect();
    assert_eq!(failed, vec!["a"]);

    let backend = ScriptedBackend::new(vec![Err(CseError::Network("reset".into()))]);
    let items = scraper(backend).scrape_one("a", &SearchConfig::default()).await.unwrap();
    assert!(items.is_empty());
}

#[tokio::test]
async fn unsupported_features_skip_without_fetching() {
    let backend = ScriptedBackend::new(vec![]);
    let config = SearchConfig {
        include_paa: true,
        ..Default::default()
    };
    let report = scraper(backend.clone()).scrape_many(&keywords(&["rust"]), &config).await;
    assert!(backend.calls().is_empty());
    assert_eq!(report.keywords[0].skipped_sub_queries, 1);
    assert!(report.keywords[0].error.is_none());
}

#[tokio::test]
async fn unconfigured_backend_skips() {
    let backend = Arc::new(ScriptedBackend {
        configured: false,
        replies: Mutex::new(VecDeque::new()),
        calls: Mutex::new(Vec::new()),
    });
    let items = scraper(backend.clone())
        .scrape_one("rust", &SearchConfig::default())
        .await
        .unwrap();
    assert!(items.is_empty());
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let config = SearchConfig {
        results_per_page: 0,
        ..Default::default()
    };
    let s = scraper(ScriptedBackend::new(vec![]));
    assert!(matches!(
        s.scrape_one("rust", &config).await,
        Err(ScrapeError::Config(_))
    ));
    let report = s.scrape_many(&keywords(&["rust"]), &config).await;
    assert!(matches!(report.halted, Some(ScrapeError::Config(_))));
    assert!(report.keywords.is_empty());
}

#[tokio::test]
async fn cancelled_batch_issues_no_requests() {
    let backend = ScriptedBackend::new(vec![]);
    let cancel = CancellationToken::new();
    let s = Scraper::new(
        backend.clone(),
        ScraperSettings {
            delay: Duration::ZERO,
            ..Default::default()
        }
        .with_cancellation(cancel.clone()),
    );
    cancel.cancel();

    let report = s.scrape_many(&keywords(&["a", "b"]), &SearchConfig::default()).await;
    assert!(report.cancelled);
    assert!(report.keywords.is_empty());
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn end_to_end_against_mock_upstream() {
    let server = MockServer::start().await;
    let items: Vec<_> = (1..=3)
        .map(|i| {
            json!({
                "title": format!("Engineer {i}"),
                "link": format!("https://example.com/people/{i}"),
                "displayLink": "example.com",
                "snippet": format!("Engineer number {i}.")
            })
        })
        .collect();
    Mock::given(method("GET"))
        .and(query_param("q", "site:example.com engineer"))
        .and(query_param("start", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "searchInformation": { "totalResults": "3" },
            "items": items
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("start", "11"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .expect(0)
        .mount(&server)
        .await;

    let credentials = Arc::new(CredentialManager::new(
        Some("AIzaSyPrimaryPrimaryPrimaryPrimary000".into()),
        Some("0123456789abcdef:ghij".into()),
    ));
    let client = CseClient::new(
        CseSettings {
            base_url: format!("{}/customsearch/v1", server.uri()),
            max_retries: 0,
            ..Default::default()
        },
        credentials,
        None,
        None,
    )
    .unwrap();
    let s = Scraper::new(
        Arc::new(client),
        ScraperSettings {
            delay: Duration::ZERO,
            ..Default::default()
        },
    );
    let config = SearchConfig {
        max_pages: 2,
        ..Default::default()
    };

    let report = s
        .scrape_many(&keywords(&["site:example.com engineer"]), &config)
        .await;
    assert!(report.halted.is_none());
    let positions: Vec<u32> = report
        .items
        .iter()
        .map(|i| i.search_results[0].position)
        .collect();
    assert_eq!(positions, vec![1, 2, 3]);

    let unified = normalize_all(&report.items);
    assert_eq!(unified.len(), 3);
    assert_eq!(unified[0].search_query.term, "site:example.com engineer");
    assert_eq!(unified[2].organic_results[0].url.as_deref(), Some("https://example.com/people/3"));
}
