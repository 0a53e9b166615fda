//! Integration tests for the local proxy.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use netlify_dev::config::free_port;
use netlify_dev::services::{ForwardProxyParams, LocalProxy, ProxyParams, ProxyServer};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::test_helpers::{recording_registry, FakeGate, FakeRunner, Journal};

fn proxy(journal: &Journal, ready: bool, registry: &netlify_dev::CleanupRegistry) -> LocalProxy {
    LocalProxy::new(
        Arc::new(FakeRunner(journal.clone())),
        Arc::new(FakeGate {
            journal: journal.clone(),
            ready,
        }),
        registry,
    )
}

fn proxy_params(port: u16, framework: &MockServer, functions: &MockServer) -> ProxyParams {
    ProxyParams {
        port,
        framework_port: framework.address().port(),
        functions_port: functions.address().port(),
        addons_urls: BTreeMap::new(),
        config_path: PathBuf::from("netlify.toml"),
        root: PathBuf::from("."),
    }
}

#[tokio::test]
async fn reverse_proxy_routes_to_each_upstream() {
    let framework = MockServer::start().await;
    let functions = MockServer::start().await;
    let addon = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/about"))
        .and(query_param("lang", "en"))
        .respond_with(ResponseTemplate::new(200).set_body_string("framework page"))
        .mount(&framework)
        .await;
    Mock::given(method("POST"))
        .and(path("/.netlify/functions/hello"))
        .and(header("x-trace", "abc"))
        .respond_with(ResponseTemplate::new(201).set_body_string("from function"))
        .mount(&functions)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/items"))
        .respond_with(ResponseTemplate::new(200).set_body_string("addon items"))
        .mount(&addon)
        .await;

    let journal = Journal::default();
    let (registry, _exits) = recording_registry();
    let port = free_port().unwrap();
    let mut params = proxy_params(port, &framework, &functions);
    params.addons_urls.insert("fauna".into(), format!("{}/", addon.uri()));

    let url = proxy(&journal, true, &registry)
        .start_proxy(&params)
        .await
        .unwrap()
        .expect("proxy should bind");
    assert_eq!(url, format!("http://localhost:{port}"));

    let base = format!("http://127.0.0.1:{port}");
    let http = reqwest::Client::new();

    let page = http.get(format!("{base}/about?lang=en")).send().await.unwrap();
    assert_eq!(page.status(), 200);
    assert_eq!(page.text().await.unwrap(), "framework page");

    let function = http
        .post(format!("{base}/.netlify/functions/hello"))
        .header("x-trace", "abc")
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(function.status(), 201);
    assert_eq!(function.text().await.unwrap(), "from function");

    let items = http
        .get(format!("{base}/.netlify/fauna/rest/items"))
        .send()
        .await
        .unwrap();
    assert_eq!(items.text().await.unwrap(), "addon items");

    assert!(journal.entries().is_empty(), "reverse proxy launches nothing");
    registry.run_once(0).await;
}

#[tokio::test]
async fn upstream_redirects_reach_the_browser() {
    let framework = MockServer::start().await;
    let functions = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old-home"))
        .respond_with(ResponseTemplate::new(301).insert_header("location", "/new-home"))
        .expect(1)
        .mount(&framework)
        .await;
    Mock::given(method("GET"))
        .and(path("/new-home"))
        .respond_with(ResponseTemplate::new(200).set_body_string("followed"))
        .expect(0)
        .mount(&framework)
        .await;

    let journal = Journal::default();
    let (registry, _exits) = recording_registry();
    let port = free_port().unwrap();
    proxy(&journal, true, &registry)
        .start_proxy(&proxy_params(port, &framework, &functions))
        .await
        .unwrap()
        .expect("proxy should bind");

    let http = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();
    let response = http
        .get(format!("http://127.0.0.1:{port}/old-home"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 301);
    assert_eq!(
        response
            .headers()
            .get("location")
            .and_then(|value| value.to_str().ok()),
        Some("/new-home")
    );
    registry.run_once(0).await;
}

#[tokio::test]
async fn unreachable_upstream_is_bad_gateway() {
    let functions = MockServer::start().await;
    let framework = MockServer::start().await;
    let journal = Journal::default();
    let (registry, _exits) = recording_registry();
    let port = free_port().unwrap();
    let mut params = proxy_params(port, &framework, &functions);
    params.framework_port = free_port().unwrap();

    proxy(&journal, true, &registry)
        .start_proxy(&params)
        .await
        .unwrap()
        .expect("proxy should bind");

    let response = reqwest::get(format!("http://127.0.0.1:{port}/")).await.unwrap();
    assert_eq!(response.status(), 502);
    registry.run_once(0).await;
}

#[tokio::test]
async fn busy_proxy_port_yields_no_url() {
    let framework = MockServer::start().await;
    let functions = MockServer::start().await;
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();
    let (registry, _exits) = recording_registry();

    let url = proxy(&Journal::default(), true, &registry)
        .start_proxy(&proxy_params(port, &framework, &functions))
        .await
        .unwrap();
    assert_eq!(url, None);
}

fn forward_params(port: u16) -> ForwardProxyParams {
    ForwardProxyParams {
        port,
        framework_port: 3000,
        functions_port: 34567,
        publish_dir: PathBuf::from("public"),
        config_path: PathBuf::from("netlify.toml"),
        geo_db: None,
        jwt_secret: None,
        jwt_role_path: None,
    }
}

#[tokio::test]
async fn forward_proxy_launches_agent_and_waits_for_its_port() {
    let journal = Journal::default();
    let (registry, _exits) = recording_registry();

    let url = proxy(&journal, true, &registry)
        .start_forward_proxy(&forward_params(8888))
        .await
        .unwrap();

    assert_eq!(url.as_deref(), Some("http://localhost:8888"));
    let entries = journal.entries();
    assert!(entries[0].starts_with("run:"), "{entries:?}");
    assert!(entries[0].contains("--port 8888"), "{entries:?}");
    assert_eq!(entries[1], "gate:8888");
}

#[tokio::test]
async fn forward_proxy_that_never_listens_yields_no_url() {
    let journal = Journal::default();
    let (registry, _exits) = recording_registry();

    let url = proxy(&journal, false, &registry)
        .start_forward_proxy(&forward_params(8888))
        .await
        .unwrap();

    assert_eq!(url, None);
    assert!(journal.contains("gate:8888"));
}
