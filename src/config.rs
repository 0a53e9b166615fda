//! Site configuration parsing, option merging, and server settings detection.

use std::collections::BTreeMap;
use std::fs;
use std::net::TcpListener;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::orchestrator::port_gate::PortProtocol;
use crate::{AppError, Result};

/// Framework value that forces the static file server.
pub const STATIC_FRAMEWORK: &str = "#static";

/// File name of the operations document when none is configured.
pub const DEFAULT_OPERATIONS_FILENAME: &str = "netlifyGraphOperationsLibrary.graphql";

const DEFAULT_PROXY_PORT: u16 = 8888;
const DEFAULT_STATIC_SERVER_PORT: u16 = 3999;
const DEFAULT_FUNCTIONS_DIR: &str = "netlify/functions";

/// `[build]` table of the site configuration file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuildSection {
    /// Production build command. Not run by the dev orchestrator.
    pub command: Option<String>,
    /// Directory holding the built site.
    pub publish: Option<PathBuf>,
    /// Directory holding serverless functions.
    pub functions: Option<PathBuf>,
    /// Environment overrides applied to every spawned command.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// `[dev]` table of the site configuration file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DevSection {
    /// Command that starts the framework dev server.
    pub command: Option<String>,
    /// Port the proxy listens on.
    pub port: Option<u16>,
    /// Port the framework dev server listens on.
    pub target_port: Option<u16>,
    /// Framework identifier (`#static`, `#custom`, ...).
    pub framework: Option<String>,
    /// Directory served in static mode.
    pub publish: Option<PathBuf>,
    /// Directory holding serverless functions.
    pub functions: Option<PathBuf>,
    /// Port of the functions runtime.
    pub functions_port: Option<u16>,
    /// Port of the static file server.
    pub static_server_port: Option<u16>,
    /// Whether to open a browser once the proxy is ready.
    pub auto_launch: Option<bool>,
    /// Readiness probing strategies (`TCP`, `HTTP`).
    #[serde(default)]
    pub polling_strategies: Vec<String>,
    /// Secret used by the forward proxy to verify JWTs.
    pub jwt_secret: Option<String>,
    /// Claim path holding roles inside verified JWTs.
    pub jwt_role_path: Option<String>,
}

/// `[graph]` table of the site configuration file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GraphSection {
    /// Location of the operations document.
    pub operations_path: Option<PathBuf>,
    /// Directory generated graph functions are written to.
    pub functions_path: Option<PathBuf>,
    /// Framework hint for generated code.
    pub framework: Option<String>,
    /// Language hint for generated code.
    pub language: Option<String>,
}

/// Parsed site configuration file (`netlify.toml`).
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    /// Build settings.
    #[serde(default)]
    pub build: BuildSection,
    /// Local development settings.
    #[serde(default)]
    pub dev: DevSection,
    /// Graph session settings.
    #[serde(default)]
    pub graph: GraphSection,
}

impl SiteConfig {
    /// Load the site configuration from `path`.
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file exists but cannot be read or
    /// contains invalid TOML.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no site config file; using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read site config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse the site configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}

/// Options supplied on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevOptions {
    /// Command that starts the framework dev server.
    pub command: Option<String>,
    /// Proxy port.
    pub port: Option<u16>,
    /// Framework dev server port.
    pub target_port: Option<u16>,
    /// Framework identifier.
    pub framework: Option<String>,
    /// Directory served in static mode.
    pub dir: Option<PathBuf>,
    /// Functions directory.
    pub functions: Option<PathBuf>,
    /// Disable every network-dependent feature.
    pub offline: bool,
    /// Start a public live tunnel.
    pub live: bool,
    /// Functions runtime port.
    pub functions_port: Option<u16>,
    /// Static file server port.
    pub static_server_port: Option<u16>,
    /// Use the forward proxy with edge handlers.
    pub edge_handlers: bool,
    /// Deprecated alias of `edge_handlers`.
    pub traffic_mesh: bool,
    /// GeoIP database used by the forward proxy.
    pub location_db: Option<PathBuf>,
    /// Start the graph collaborative session.
    pub graph: bool,
    /// Never auto-launch a browser.
    pub no_open: bool,
}

impl DevOptions {
    /// Whether the forward proxy was requested.
    #[must_use]
    pub fn use_forward_proxy(&self) -> bool {
        self.edge_handlers || self.traffic_mesh
    }
}

/// Local development configuration after merging every source.
///
/// Fields start from their defaults, then `[build]`, then `[dev]`, then
/// command-line options are applied in that order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevConfig {
    /// Command that starts the framework dev server.
    pub command: Option<String>,
    /// Proxy port.
    pub port: u16,
    /// Framework dev server port.
    pub target_port: Option<u16>,
    /// Framework identifier.
    pub framework: Option<String>,
    /// Directory served in static mode.
    pub dist: Option<PathBuf>,
    /// Functions directory.
    pub functions: Option<PathBuf>,
    /// Functions runtime port.
    pub functions_port: Option<u16>,
    /// Static file server port.
    pub static_server_port: u16,
    /// Whether to open a browser once ready.
    pub auto_launch: bool,
    /// Readiness probing strategies.
    pub polling_strategies: Vec<String>,
    /// Environment overrides for spawned commands.
    pub environment: BTreeMap<String, String>,
    /// Forward proxy JWT secret.
    pub jwt_secret: Option<String>,
    /// Forward proxy JWT role path.
    pub jwt_role_path: Option<String>,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            command: None,
            port: DEFAULT_PROXY_PORT,
            target_port: None,
            framework: None,
            dist: None,
            functions: None,
            functions_port: None,
            static_server_port: DEFAULT_STATIC_SERVER_PORT,
            auto_launch: true,
            polling_strategies: Vec::new(),
            environment: BTreeMap::new(),
            jwt_secret: None,
            jwt_role_path: None,
        }
    }
}

impl DevConfig {
    /// Merge defaults, the site configuration and command-line options.
    #[must_use]
    pub fn resolve(site: &SiteConfig, options: &DevOptions) -> Self {
        let mut config = Self::default();

        let build = &site.build;
        override_with(&mut config.dist, build.publish.clone());
        override_with(&mut config.functions, build.functions.clone());
        config.environment.clone_from(&build.environment);

        let dev = &site.dev;
        override_with(&mut config.command, dev.command.clone());
        override_with(&mut config.target_port, dev.target_port);
        override_with(&mut config.framework, dev.framework.clone());
        override_with(&mut config.dist, dev.publish.clone());
        override_with(&mut config.functions, dev.functions.clone());
        override_with(&mut config.functions_port, dev.functions_port);
        override_with(&mut config.jwt_secret, dev.jwt_secret.clone());
        override_with(&mut config.jwt_role_path, dev.jwt_role_path.clone());
        if let Some(port) = dev.port {
            config.port = port;
        }
        if let Some(port) = dev.static_server_port {
            config.static_server_port = port;
        }
        if let Some(auto_launch) = dev.auto_launch {
            config.auto_launch = auto_launch;
        }
        if !dev.polling_strategies.is_empty() {
            config.polling_strategies.clone_from(&dev.polling_strategies);
        }

        override_with(&mut config.command, options.command.clone());
        override_with(&mut config.target_port, options.target_port);
        override_with(&mut config.framework, options.framework.clone());
        override_with(&mut config.dist, options.dir.clone());
        override_with(&mut config.functions, options.functions.clone());
        override_with(&mut config.functions_port, options.functions_port);
        if let Some(port) = options.port {
            config.port = port;
        }
        if let Some(port) = options.static_server_port {
            config.static_server_port = port;
        }
        if options.no_open {
            config.auto_launch = false;
        }

        config
    }
}

fn override_with<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

/// Resolved settings for the local services. Read-only to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Port the proxy listens on.
    pub port: u16,
    /// Port of the framework server (or static file server).
    pub framework_port: u16,
    /// Port of the functions runtime.
    pub functions_port: u16,
    /// Absolute functions directory, if any.
    pub functions: Option<PathBuf>,
    /// Absolute directory served in static mode.
    pub dist: PathBuf,
    /// Serve `dist` with the built-in static server.
    pub use_static_server: bool,
    /// User command to run.
    pub command: Option<String>,
    /// Framework identifier.
    pub framework: Option<String>,
    /// Environment overrides for the user command.
    pub env: BTreeMap<String, String>,
    /// How readiness of the framework port is probed.
    pub wait_protocol: PortProtocol,
    /// Whether to open a browser once ready.
    pub auto_launch: bool,
    /// Forward proxy JWT secret.
    pub jwt_secret: Option<String>,
    /// Forward proxy JWT role path.
    pub jwt_role_path: Option<String>,
}

impl ServerSettings {
    /// Detect server settings from the merged configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when a custom command has no target port,
    /// when the proxy and framework ports collide, or when the proxy port
    /// cannot be acquired.
    pub fn detect(config: &DevConfig, root: &Path) -> Result<Self> {
        let static_framework = config.framework.as_deref() == Some(STATIC_FRAMEWORK);
        let use_static_server = static_framework || config.command.is_none();

        let framework_port = if use_static_server {
            config.static_server_port
        } else {
            config.target_port.ok_or_else(|| {
                AppError::Config(
                    "'targetPort' is required when running a custom 'command'".into(),
                )
            })?
        };

        if config.port == framework_port {
            return Err(AppError::Config(format!(
                "'port' and 'targetPort' must be different, both are set to {framework_port}"
            )));
        }

        if !is_port_available(config.port) {
            return Err(AppError::Config(format!(
                "Could not acquire required 'port': '{}'",
                config.port
            )));
        }

        let functions_port = match config.functions_port {
            Some(port) => port,
            None => free_port()?,
        };

        let dist = config
            .dist
            .as_deref()
            .map_or_else(|| root.to_path_buf(), |dir| resolve_path(root, dir));

        let wait_protocol = if config
            .polling_strategies
            .iter()
            .any(|strategy| strategy.eq_ignore_ascii_case("http"))
        {
            PortProtocol::Http
        } else {
            PortProtocol::Tcp
        };

        let settings = Self {
            port: config.port,
            framework_port,
            functions_port,
            functions: config.functions.as_deref().map(|dir| resolve_path(root, dir)),
            dist,
            use_static_server,
            command: config.command.clone(),
            framework: config.framework.clone(),
            env: config.environment.clone(),
            wait_protocol,
            auto_launch: config.auto_launch,
            jwt_secret: config.jwt_secret.clone(),
            jwt_role_path: config.jwt_role_path.clone(),
        };

        info!(
            port = settings.port,
            framework_port = settings.framework_port,
            functions_port = settings.functions_port,
            static_server = settings.use_static_server,
            "server settings detected"
        );
        Ok(settings)
    }
}

/// Normalized graph session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphConfig {
    /// Absolute path of the operations document.
    pub operations_path: PathBuf,
    /// Absolute directory for generated graph functions.
    pub functions_path: PathBuf,
    /// Framework hint.
    pub framework: String,
    /// Language hint.
    pub language: String,
}

impl GraphConfig {
    /// Normalize the `[graph]` table against the site root.
    #[must_use]
    pub fn normalize(site: &SiteConfig, root: &Path) -> Self {
        let functions_dir = site
            .graph
            .functions_path
            .as_ref()
            .or(site.dev.functions.as_ref())
            .or(site.build.functions.as_ref())
            .map_or_else(|| root.join(DEFAULT_FUNCTIONS_DIR), |dir| resolve_path(root, dir));

        let operations_path = site.graph.operations_path.as_ref().map_or_else(
            || root.join(DEFAULT_OPERATIONS_FILENAME),
            |path| resolve_path(root, path),
        );

        Self {
            operations_path,
            functions_path: functions_dir,
            framework: site
                .graph
                .framework
                .clone()
                .unwrap_or_else(|| "#custom".into()),
            language: site
                .graph
                .language
                .clone()
                .unwrap_or_else(|| "javascript".into()),
        }
    }
}

fn resolve_path(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Check if a port is available for binding on localhost.
#[must_use]
pub fn is_port_available(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Ask the OS for a free localhost port.
///
/// # Errors
///
/// Returns `AppError::Config` if no port can be bound.
pub fn free_port() -> Result<u16> {
    TcpListener::bind(("127.0.0.1", 0))
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .map_err(|err| AppError::Config(format!("failed to find a free port: {err}")))
}
