//! JSON-over-HTTP client used by the search backend.
//!
//! Network failures and 5xx responses are retried with exponential backoff,
//! honouring `Retry-After`. 429 is retried too unless the request opts out
//! with [`RequestOpts::fail_fast_on_429`]. Credentials travel as query
//! parameters ([`Auth::Query`]) and are sanitized first; secret parameter
//! values never reach the logs.
//!
//! Setting `SERP_HTTP_RAW=1` adds a redacted curl line per request and the
//! raw response (capped) under the `http.raw` tracing target.
//!
//! ```no_run
//! # async fn demo() -> Result<(), serp_http::HttpError> {
//! let client = serp_http::HttpClient::new("https://api.example.com")?;
//! let got: serde_json::Value = client
//!     .get_json("v1/items", serp_http::RequestOpts::default())
//!     .await?;
//! # Ok(()) }
//! ```

use std::borrow::Cow;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

const RAW_ENV: &str = "SERP_HTTP_RAW";
const RAW_BODY_LIMIT: usize = 64 * 1024;
const ERROR_BODY_LIMIT: usize = 16 * 1024;
const SNIPPET_LIMIT: usize = 500;
const BACKOFF_BASE_MS: u64 = 200;
const RATE_LIMIT_FLOOR: Duration = Duration::from_millis(1100);
const REDACTED: &str = "<redacted>";

const SECRET_PARAMS: &[&str] = &[
    "key",
    "api_key",
    "access_token",
    "token",
    "secret",
    "client_secret",
    "auth",
    "authorization",
    "bearer",
];

fn is_secret(name: &str) -> bool {
    SECRET_PARAMS.iter().any(|s| s.eq_ignore_ascii_case(name))
}

fn raw_logging() -> bool {
    std::env::var(RAW_ENV).is_ok_and(|v| matches!(v.as_str(), "1" | "true" | "yes"))
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("invalid URL: {0}")]
    Url(String),
    #[error("request build failed: {0}")]
    Build(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("decode error: {0}, body_snippet: {1}")]
    Decode(String, String),
    #[error("server returned error {status}: {message}, request_id={request_id}")]
    Api {
        status: StatusCode,
        message: String,
        request_id: String,
        /// Response body, capped, for callers that parse structured errors.
        body: String,
    },
}

impl HttpError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HttpError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// How a request authenticates.
///
/// ```
/// use serp_http::Auth;
/// use std::borrow::Cow;
///
/// let auth = Auth::Query { name: "key", value: Cow::Borrowed("AIza-demo") };
/// assert!(matches!(auth, Auth::Query { name: "key", .. }));
/// ```
#[derive(Clone, Debug)]
pub enum Auth<'a> {
    /// Credential appended as a query parameter (Google APIs use `key`).
    Query { name: &'a str, value: Cow<'a, str> },
    None,
}

/// Per-request overrides. Unset fields fall back to the client defaults.
#[derive(Clone, Debug, Default)]
pub struct RequestOpts<'a> {
    pub timeout: Option<Duration>,
    pub retries: Option<usize>,
    pub auth: Option<Auth<'a>>,
    pub query: Option<Vec<(&'a str, Cow<'a, str>)>>,
    /// Surface 429 immediately. For APIs where 429 means a spent quota
    /// rather than a burst.
    pub fail_fast_on_429: bool,
}

#[derive(Clone)]
pub struct HttpClient {
    base: Url,
    inner: Client,
    pub default_timeout: Duration,
    pub max_retries: usize,
}

/// Outcome of one failed attempt.
enum Failure {
    /// Worth another attempt after `wait` (or the default backoff).
    Retry { error: HttpError, wait: Option<Duration> },
    Fatal(HttpError),
}

/// Query pairs with auth folded in, ready to send and to log.
struct PreparedQuery<'a> {
    pairs: Vec<(&'a str, Cow<'a, str>)>,
    auth_kind: &'static str,
}

impl PreparedQuery<'_> {
    fn redacted(&self) -> String {
        self.pairs
            .iter()
            .map(|(k, v)| format!("{k}={}", if is_secret(k) { REDACTED } else { v.as_ref() }))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn redacted_url(&self, url: &Url) -> Url {
        let mut shown = url.clone();
        if !self.pairs.is_empty() {
            shown.query_pairs_mut().extend_pairs(
                self.pairs
                    .iter()
                    .map(|(k, v)| (*k, if is_secret(k) { REDACTED } else { v.as_ref() })),
            );
        }
        shown
    }
}

impl HttpClient {
    /// Client anchored at `base`, with a 15 s timeout and 2 retries.
    ///
    /// ```no_run
    /// use serp_http::{HttpClient, HttpError};
    /// use std::time::Duration;
    ///
    /// let client = HttpClient::new("https://api.example.com")?
    ///     .with_timeout(Duration::from_secs(2))
    ///     .with_retries(5);
    /// assert_eq!(client.default_timeout, Duration::from_secs(2));
    /// assert_eq!(client.max_retries, 5);
    /// # Ok::<(), HttpError>(())
    /// ```
    pub fn new(base: &str) -> Result<Self, HttpError> {
        let base = Url::parse(base).map_err(|e| HttpError::Url(e.to_string()))?;
        let inner = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| HttpError::Build(e.to_string()))?;
        Ok(Self {
            base,
            inner,
            default_timeout: Duration::from_secs(15),
            max_retries: 2,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    pub async fn get_json<T>(&self, path: &str, opts: RequestOpts<'_>) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
    {
        self.send_json(Method::GET, path, opts).await
    }

    fn resolve_url(&self, path: &str) -> Result<Url, HttpError> {
        if path.is_empty() {
            return Ok(self.base.clone());
        }
        self.base.join(path).map_err(|e| HttpError::Url(e.to_string()))
    }

    async fn send_json<T>(&self, method: Method, path: &str, opts: RequestOpts<'_>) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
    {
        let url = self.resolve_url(path)?;
        let query = prepare_query(&opts)?;
        let retries = opts.retries.unwrap_or(self.max_retries);
        let timeout = opts.timeout.unwrap_or(self.default_timeout);

        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let error = match self.attempt::<T>(&method, &url, &query, &opts, timeout, attempt).await {
                Ok(value) => return Ok(value),
                Err(Failure::Retry { error, wait }) if attempt <= retries => {
                    let delay = wait.unwrap_or_else(|| backoff(attempt));
                    tracing::warn!(
                        attempt,
                        retries,
                        backoff_ms = delay.as_millis() as u64,
                        error = %error,
                        "http.retrying"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(Failure::Retry { error, .. } | Failure::Fatal(error)) => error,
            };
            tracing::warn!(attempt, status = ?error.status(), error = %error, "http.error");
            return Err(error);
        }
    }

    async fn attempt<T>(
        &self,
        method: &Method,
        url: &Url,
        query: &PreparedQuery<'_>,
        opts: &RequestOpts<'_>,
        timeout: Duration,
        attempt: usize,
    ) -> Result<T, Failure>
    where
        T: DeserializeOwned,
    {
        let req_id = uuid::Uuid::new_v4().simple().to_string();
        let mut rb = self.inner.request(method.clone(), url.clone()).timeout(timeout);
        if !query.pairs.is_empty() {
            rb = rb.query(&query.pairs);
        }

        tracing::debug!(
            req_id = %req_id,
            attempt,
            method = %method,
            host_path = %format!("{}{}", url.host_str().unwrap_or("-"), url.path()),
            query = %query.redacted(),
            timeout_ms = timeout.as_millis() as u64,
            auth_kind = query.auth_kind,
            "http.request.start"
        );
        if raw_logging() {
            let curl = curl_line(method, &query.redacted_url(url));
            tracing::debug!(target: "http.raw", %req_id, %curl, "request");
        }

        let started = Instant::now();
        let network = |e: reqwest::Error| Failure::Retry {
            error: HttpError::Network(e.to_string()),
            wait: None,
        };
        let response = rb.send().await.map_err(network)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(network)?;

        tracing::debug!(
            req_id = %req_id,
            %status,
            duration_ms = started.elapsed().as_millis() as u64,
            body_len = body.len(),
            x_request_id = %upstream_request_id(&headers),
            "http.response"
        );
        if raw_logging() {
            let shown = String::from_utf8_lossy(&body[..body.len().min(RAW_BODY_LIMIT)]);
            tracing::info!(
                target: "http.raw",
                %req_id,
                %status,
                truncated = body.len() > RAW_BODY_LIMIT,
                body = %shown,
                "response"
            );
        }

        if status.is_success() {
            return serde_json::from_slice::<T>(&body).map_err(|e| {
                let snip = snippet(&body);
                tracing::warn!(req_id = %req_id, error = %e, body_snippet = %snip, "http.response.decode_error");
                Failure::Fatal(HttpError::Decode(e.to_string(), snip))
            });
        }

        let error = HttpError::Api {
            status,
            message: error_message(&body),
            request_id: upstream_request_id(&headers).to_string(),
            body: String::from_utf8_lossy(&body[..body.len().min(ERROR_BODY_LIMIT)]).into_owned(),
        };
        Err(match retry_wait(status, &headers, attempt, opts.fail_fast_on_429) {
            Some(wait) => Failure::Retry {
                error,
                wait: Some(wait),
            },
            None => Failure::Fatal(error),
        })
    }
}

fn prepare_query<'a>(opts: &RequestOpts<'a>) -> Result<PreparedQuery<'a>, HttpError> {
    let mut pairs = opts.query.clone().unwrap_or_default();
    let auth_kind = match &opts.auth {
        Some(Auth::Query { name, value }) => {
            pairs.push((*name, Cow::Owned(sanitize_credential(value)?)));
            "query"
        }
        Some(Auth::None) | None => "none",
    };
    Ok(PreparedQuery { pairs, auth_kind })
}

/// Delay before retrying `status`, or `None` when the status is final.
fn retry_wait(status: StatusCode, headers: &HeaderMap, attempt: usize, fail_fast_on_429: bool) -> Option<Duration> {
    let rate_limited = status == StatusCode::TOO_MANY_REQUESTS;
    if !status.is_server_error() && !(rate_limited && !fail_fast_on_429) {
        return None;
    }
    Some(match retry_after(headers) {
        Some(hinted) => hinted,
        None if rate_limited => backoff(attempt).max(RATE_LIMIT_FLOOR),
        None => backoff(attempt),
    })
}

fn backoff(attempt: usize) -> Duration {
    let exp = attempt.saturating_sub(1).min(16) as u32;
    Duration::from_millis(BACKOFF_BASE_MS.saturating_mul(1u64 << exp))
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let secs = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()?;
    Some(Duration::from_secs(secs))
}

fn upstream_request_id(headers: &HeaderMap) -> &str {
    ["x-request-id", "x-goog-request-id"]
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
        .unwrap_or("-")
}

/// Best human-readable message in an error body. Google's
/// `{"error":{"message":..}}` wins, then flat `message`/`detail`/`error`.
fn error_message(body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        let found = ["/error/message", "/message", "/detail", "/error"]
            .iter()
            .filter_map(|ptr| value.pointer(ptr).and_then(Value::as_str))
            .find(|s| !s.is_empty());
        if let Some(message) = found {
            return message.to_string();
        }
    }
    snippet(body)
}

/// First bytes of a body for logs, cut on a char boundary.
fn snippet(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= SNIPPET_LIMIT {
        return text.into_owned();
    }
    let cut = (0..=SNIPPET_LIMIT)
        .rev()
        .find(|i| text.is_char_boundary(*i))
        .unwrap_or(0);
    format!("{}...", &text[..cut])
}

fn curl_line(method: &Method, url: &Url) -> String {
    format!("curl -X{method} '{}'", url.as_str().replace('\'', r"'\''"))
}

/// Strip quotes and whitespace that sneak in through env files and shells.
fn sanitize_credential(raw: &str) -> Result<String, HttpError> {
    let cleaned: String = raw
        .trim()
        .trim_matches(['"', '\''])
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if !cleaned.is_ascii() {
        return Err(HttpError::Build("credential contains non-ASCII bytes".into()));
    }
    if cleaned.chars().any(|c| c.is_ascii_control()) {
        return Err(HttpError::Build("credential contains control characters".into()));
    }
    if cleaned.is_empty() {
        return Err(HttpError::Build("credential is empty".into()));
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn sanitize_strips_quotes_and_whitespace() {
        assert_eq!(sanitize_credential(" 'AIza abc\n' ").unwrap(), "AIzaabc");
        assert!(sanitize_credential("\"\"").is_err());
        assert!(sanitize_credential("AIzaé").is_err());
        assert!(sanitize_credential("AIza\u{7f}x").is_err());
    }

    #[test]
    fn redaction_hides_key_but_keeps_query() {
        let opts = RequestOpts {
            auth: Some(Auth::Query {
                name: "key",
                value: Cow::Borrowed("AIzaSECRET"),
            }),
            query: Some(vec![("q", Cow::Borrowed("rust"))]),
            ..Default::default()
        };
        let query = prepare_query(&opts).unwrap();
        assert_eq!(query.auth_kind, "query");
        assert_eq!(query.redacted(), "q=rust&key=<redacted>");

        let url = Url::parse("https://www.googleapis.com/customsearch/v1").unwrap();
        let shown = query.redacted_url(&url).to_string();
        assert!(!shown.contains("AIzaSECRET"));
        assert!(shown.contains("q=rust"));
    }

    #[test]
    fn curl_line_uses_redacted_url() {
        let opts = RequestOpts {
            auth: Some(Auth::Query {
                name: "key",
                value: Cow::Borrowed("AIzaSECRET"),
            }),
            query: Some(vec![("q", Cow::Borrowed("it's rust"))]),
            ..Default::default()
        };
        let query = prepare_query(&opts).unwrap();
        let url = Url::parse("https://www.googleapis.com/customsearch/v1").unwrap();
        let line = curl_line(&Method::GET, &query.redacted_url(&url));
        assert!(line.starts_with("curl -XGET 'https://www.googleapis.com/customsearch/v1?"));
        assert!(!line.contains("AIzaSECRET"));
        assert!(line.ends_with('\''));
    }

    #[test]
    fn google_error_message_is_extracted() {
        let body = br#"{"error":{"code":429,"message":"Quota exceeded for quota metric","status":"RESOURCE_EXHAUSTED"}}"#;
        assert_eq!(error_message(body), "Quota exceeded for quota metric");
        assert_eq!(error_message(br#"{"detail":"nope"}"#), "nope");
        assert_eq!(error_message(br#"{"error":"bad_request"}"#), "bad_request");
        assert_eq!(error_message(b"plain text"), "plain text");
    }

    #[test]
    fn snippet_respects_char_boundaries() {
        let body = "é".repeat(400);
        let snip = snippet(body.as_bytes());
        assert!(snip.ends_with("..."));
        assert!(snip.len() <= SNIPPET_LIMIT + 3);
        assert_eq!(snippet(b"short"), "short");
    }

    #[test]
    fn backoff_grows_exponentially() {
        assert_eq!(backoff(1), Duration::from_millis(200));
        assert_eq!(backoff(2), Duration::from_millis(400));
        assert_eq!(backoff(3), Duration::from_millis(800));
    }

    #[test]
    fn retry_policy_by_status() {
        let none = HeaderMap::new();
        assert_eq!(
            retry_wait(StatusCode::SERVICE_UNAVAILABLE, &none, 1, true),
            Some(Duration::from_millis(200))
        );
        assert_eq!(retry_wait(StatusCode::TOO_MANY_REQUESTS, &none, 1, true), None);
        assert_eq!(
            retry_wait(StatusCode::TOO_MANY_REQUESTS, &none, 1, false),
            Some(RATE_LIMIT_FLOOR)
        );
        assert_eq!(retry_wait(StatusCode::FORBIDDEN, &none, 1, false), None);

        let mut hinted = HeaderMap::new();
        hinted.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        assert_eq!(
            retry_wait(StatusCode::BAD_GATEWAY, &hinted, 1, true),
            Some(Duration::from_secs(3))
        );
    }

    #[test]
    fn empty_path_resolves_to_base() {
        let client = HttpClient::new("https://www.googleapis.com/customsearch/v1").unwrap();
        assert_eq!(
            client.resolve_url("").unwrap().as_str(),
            "https://www.googleapis.com/customsearch/v1"
        );
    }
}
