//! Unit tests for the explicit export surface.

use netlify_dev::exports::{EnvExports, BASE_URL, DEPLOY_URL, URL};

#[test]
fn exports_stay_in_memory() {
    let exports = EnvExports::new();
    exports.set("NETLIFY_DEV_TEST_EXPORT", "value");

    assert_eq!(
        exports.get("NETLIFY_DEV_TEST_EXPORT").as_deref(),
        Some("value")
    );
    assert!(std::env::var("NETLIFY_DEV_TEST_EXPORT").is_err());
}

#[test]
fn clones_share_values() {
    let exports = EnvExports::new();
    let other = exports.clone();
    other.set(URL, "http://localhost:8888");
    other.set(DEPLOY_URL, "http://localhost:8888");

    let snapshot = exports.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot.get(URL).map(String::as_str), Some("http://localhost:8888"));

    exports.remove(URL);
    assert_eq!(other.get(URL), None);
}

#[test]
fn compatibility_variables_are_not_written_to_the_process() {
    let exports = EnvExports::new();
    exports.set(BASE_URL, "https://live.example");

    assert_eq!(exports.get(BASE_URL).as_deref(), Some("https://live.example"));
    assert_ne!(std::env::var(BASE_URL).as_deref(), Ok("https://live.example"));

    exports.remove(BASE_URL);
    assert_eq!(exports.get(BASE_URL), None);
}
