//! Integration tests for the hosting API client against a mock server.

use netlify_dev::api::NetlifyApi;
use netlify_dev::AppError;
use serde_json::json;
use wiremock::matchers::{bearer_token, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn get_site_sends_bearer_and_decodes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sites/site-1"))
        .and(bearer_token("secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "site-1",
            "name": "demo",
            "authlify_token_id": "tok-1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = NetlifyApi::new(format!("{}/", server.uri()), Some("secret".into()));
    let site = api.get_site("site-1").await.unwrap();

    assert_eq!(site.name, "demo");
    assert_eq!(site.auth_token_id(), Some("tok-1"));
    assert_eq!(site.url, None);
}

#[tokio::test]
async fn unknown_site_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sites/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = NetlifyApi::new(server.uri(), None)
        .get_site("missing")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)), "got {err:?}");
}

#[tokio::test]
async fn server_error_carries_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sites/site-1"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let err = NetlifyApi::new(server.uri(), Some("t".into()))
        .get_site("site-1")
        .await
        .unwrap_err();
    match err {
        AppError::Api(message) => assert!(message.contains("boom"), "{message}"),
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_body_is_an_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sites/site-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = NetlifyApi::new(server.uri(), None)
        .get_site("site-1")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Api(_)), "got {err:?}");
}

#[tokio::test]
async fn lists_service_instances() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sites/site-1/service-instances"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "service_slug": "fauna", "url": "https://fauna.example" },
            { "service_slug": "cms", "url": "https://cms.example" }
        ])))
        .mount(&server)
        .await;

    let instances = NetlifyApi::new(server.uri(), Some("t".into()))
        .list_service_instances("site-1")
        .await
        .unwrap();

    let slugs: Vec<_> = instances.iter().map(|i| i.service_slug.as_str()).collect();
    assert_eq!(slugs, ["fauna", "cms"]);
}

#[tokio::test]
async fn live_sessions_are_created_and_polled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/live_sessions"))
        .and(query_param("site_id", "site-1"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "live-1",
            "session_url": "https://live-1.example"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/live_sessions/live-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "live-1",
            "session_url": "https://live-1.example",
            "state": "online"
        })))
        .mount(&server)
        .await;

    let api = NetlifyApi::new(server.uri(), Some("t".into()));
    let created = api.create_live_session("site-1").await.unwrap();
    assert!(!created.is_online());

    let current = api.get_live_session(&created.id).await.unwrap();
    assert!(current.is_online());
    assert_eq!(current.session_url, "https://live-1.example");
}
