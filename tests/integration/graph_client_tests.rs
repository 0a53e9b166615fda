//! Integration tests for the HTTP graph client against a mock server.

use std::sync::Arc;
use std::time::Duration;

use netlify_dev::auth::{AuthContext, SharedAuth};
use netlify_dev::graph::client::{GraphClient, HttpGraphClient};
use serde_json::json;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{bearer_token, body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn shared_auth(graph_token: Option<&str>) -> SharedAuth {
    Arc::new(RwLock::new(AuthContext {
        graph_config: None,
        graph_token: graph_token.map(str::to_owned),
    }))
}

#[tokio::test]
async fn api_token_is_used_without_graph_credential() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sites/site-1/graph/app"))
        .and(bearer_token("api-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpGraphClient::new(server.uri(), Some("api-token".into()), shared_auth(None));
    client.ensure_app_for_site("site-1").await.unwrap();
}

#[tokio::test]
async fn injected_graph_credential_takes_precedence() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sites/site-1/graph/sessions"))
        .and(bearer_token("signed.jwt.value"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "gs-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpGraphClient::new(
        server.uri(),
        Some("api-token".into()),
        shared_auth(Some("signed.jwt.value")),
    );
    assert_eq!(client.create_session("site-1").await.unwrap(), "gs-1");
}

#[tokio::test]
async fn document_and_inactive_marking() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/sites/site-1/graph/sessions/gs-1/document"))
        .and(body_json(json!({ "document": "query Q { a }" })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/graph/sessions/gs-1"))
        .and(body_json(json!({ "status": "inactive" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpGraphClient::new(server.uri(), None, shared_auth(None));
    client
        .persist_document("site-1", "gs-1", "query Q { a }")
        .await
        .unwrap();
    client.mark_session_inactive("gs-1").await.unwrap();
}

#[tokio::test]
async fn session_lookup_reports_status_and_absence() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/graph/sessions/gs-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "id": "gs-1", "status": "inactive" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/graph/sessions/gs-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "gs-2" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/graph/sessions/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = HttpGraphClient::new(server.uri(), Some("t".into()), shared_auth(None));

    let inactive = client.get_session("gs-1").await.unwrap().unwrap();
    assert!(!inactive.is_active());
    let live = client.get_session("gs-2").await.unwrap().unwrap();
    assert!(live.is_active());
    assert_eq!(client.get_session("gone").await.unwrap(), None);
}

#[tokio::test]
async fn rejected_document_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/sites/site-1/graph/sessions/gs-1/document"))
        .respond_with(ResponseTemplate::new(422).set_body_string("invalid document"))
        .mount(&server)
        .await;

    let client = HttpGraphClient::new(server.uri(), None, shared_auth(None));
    let err = client
        .persist_document("site-1", "gs-1", "nonsense")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid document"), "{err}");
}

#[tokio::test]
async fn watcher_acknowledges_events_until_cancelled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/graph/sessions/gs-1/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "ev-1",
            "kind": "operations-changed",
            "created_at": "2026-01-01T00:00:00Z"
        }])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graph/sessions/gs-1/events/ack"))
        .and(body_json(json!({ "eventIds": ["ev-1"] })))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = Arc::new(
        HttpGraphClient::new(server.uri(), None, shared_auth(None))
            .with_poll_interval(Duration::from_millis(20)),
    );
    let cancel = CancellationToken::new();
    let watcher = {
        let client = Arc::clone(&client);
        let cancel = cancel.clone();
        tokio::spawn(async move { client.watch_session("gs-1", cancel).await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let requests = server.received_requests().await.unwrap_or_default();
            if requests.iter().any(|r| r.url.path().ends_with("/events/ack")) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("events should be acknowledged");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), watcher)
        .await
        .expect("watcher should stop after cancel")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn watcher_survives_feed_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/graph/sessions/gs-1/events"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = HttpGraphClient::new(server.uri(), None, shared_auth(None))
        .with_poll_interval(Duration::from_millis(10));
    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        stopper.cancel();
    });

    client.watch_session("gs-1", cancel).await.unwrap();
    let polls = server.received_requests().await.unwrap_or_default().len();
    assert!(polls >= 2, "watcher stopped polling after an error: {polls}");
}
