//! Unit tests for `AppError` display and conversions.

use netlify_dev::AppError;

#[test]
fn display_is_prefixed_by_category() {
    let cases = [
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::PortTimeout("slow".into()), "port timeout: slow"),
        (AppError::ProxyBind("taken".into()), "proxy bind: taken"),
        (AppError::Process("died".into()), "process: died"),
        (AppError::Session("gone".into()), "session: gone"),
        (AppError::Auth("denied".into()), "auth: denied"),
        (AppError::Api("503".into()), "api: 503"),
        (AppError::Watch("inotify".into()), "watch: inotify"),
        (AppError::Io("disk".into()), "io: disk"),
        (AppError::NotFound("site".into()), "not found: site"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn toml_errors_become_config_errors() {
    let parse: Result<toml::Value, _> = toml::from_str("= nope");
    let err: AppError = parse.unwrap_err().into();
    assert!(err.to_string().starts_with("config: invalid config"));
}

#[test]
fn io_errors_become_io_errors() {
    let err: AppError = std::io::Error::other("boom").into();
    assert!(matches!(err, AppError::Io(ref msg) if msg == "boom"));
}
