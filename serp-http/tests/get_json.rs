use std::borrow::Cow;
use std::time::Duration;

use serde_json::{Value, json};
use serp_http::{Auth, HttpClient, HttpError, RequestOpts};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> HttpClient {
    HttpClient::new(&format!("{}/customsearch/v1", server.uri()))
        .unwrap()
        .with_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn query_auth_is_sanitized_and_appended() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/customsearch/v1"))
        .and(query_param("key", "AIzaDemoKey"))
        .and(query_param("q", "rust developer"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let got: Value = client(&server)
        .get_json(
            "",
            RequestOpts {
                auth: Some(Auth::Query {
                    name: "key",
                    value: Cow::Borrowed(" 'AIzaDemoKey'\n"),
                }),
                query: Some(vec![("q", Cow::Borrowed("rust developer"))]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(got, json!({ "items": [] }));
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({ "error": { "message": "busy" } })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    let got: Value = client(&server)
        .with_retries(1)
        .get_json("", RequestOpts::default())
        .await
        .unwrap();
    assert_eq!(got["ok"], true);
}

#[tokio::test]
async fn fail_fast_429_surfaces_body() {
    let server = MockServer::start().await;
    let body = json!({
        "error": { "code": 429, "message": "Quota exceeded", "status": "RESOURCE_EXHAUSTED" }
    });
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).set_body_json(body))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server)
        .with_retries(3)
        .get_json::<Value>(
            "",
            RequestOpts {
                fail_fast_on_429: true,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    match err {
        HttpError::Api {
            status,
            message,
            body,
            ..
        } => {
            assert_eq!(status.as_u16(), 429);
            assert_eq!(message, "Quota exceeded");
            assert!(body.contains("RESOURCE_EXHAUSTED"));
        }
        other => panic!("expected api error, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = client(&server)
        .get_json::<Value>("", RequestOpts::default())
        .await
        .unwrap_err();
    assert!(matches!(err, HttpError::Decode(_, snippet) if snippet.contains("oops")));
}
