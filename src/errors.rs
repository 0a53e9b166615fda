//! Error types shared across the orchestrator.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all orchestration failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Server settings could not be resolved from config and flags.
    Config(String),
    /// The readiness gate never observed an open port.
    PortTimeout(String),
    /// Neither proxy mode produced a reachable URL.
    ProxyBind(String),
    /// A supervised child process could not be started or failed.
    Process(String),
    /// Remote collaborative session failure.
    Session(String),
    /// Credential loading or signing failure.
    Auth(String),
    /// Remote HTTP API failure.
    Api(String),
    /// File-system watch failure.
    Watch(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Requested entity does not exist.
    NotFound(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::PortTimeout(msg) => write!(f, "port timeout: {msg}"),
            Self::ProxyBind(msg) => write!(f, "proxy bind: {msg}"),
            Self::Process(msg) => write!(f, "process: {msg}"),
            Self::Session(msg) => write!(f, "session: {msg}"),
            Self::Auth(msg) => write!(f, "auth: {msg}"),
            Self::Api(msg) => write!(f, "api: {msg}"),
            Self::Watch(msg) => write!(f, "watch: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::Api(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<notify::Error> for AppError {
    fn from(err: notify::Error) -> Self {
        Self::Watch(err.to_string())
    }
}
