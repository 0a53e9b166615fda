#![forbid(unsafe_code)]

//! `netlify-dev`: local development orchestrator binary.
//!
//! Resolves server settings, boots the functions runtime, the framework or
//! static server and the proxy, then layers the auth poller and the graph
//! session manager on top. Every exit path goes through one cleanup pass.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use netlify_dev::api::NetlifyApi;
use netlify_dev::auth::credentials::{load_auth_token, CredentialAuthenticator};
use netlify_dev::auth::poller::AuthPoller;
use netlify_dev::auth::SharedAuth;
use netlify_dev::config::{DevConfig, DevOptions, ServerSettings, SiteConfig};
use netlify_dev::config_watcher::DEFAULT_DEBOUNCE;
use netlify_dev::exports::EnvExports;
use netlify_dev::graph::client::HttpGraphClient;
use netlify_dev::graph::lifecycle::{start_session_manager, SessionManagerOptions};
use netlify_dev::models::site::SiteInfo;
use netlify_dev::orchestrator::port_gate::{PortGate, DEFAULT_PORT_TIMEOUT};
use netlify_dev::orchestrator::sequencer::{BootPlan, StartupSequencer};
use netlify_dev::orchestrator::signals::spawn_signal_handler;
use netlify_dev::orchestrator::supervisor::SupervisedRunner;
use netlify_dev::services::{
    AxumStaticServer, ExternalFunctionsRuntime, LocalProxy, NetlifyLiveTunnel, Services,
    SystemBrowser,
};
use netlify_dev::{AppError, CleanupRegistry, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "netlify-dev", about = "Local development server", version, long_about = None)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Command that starts the framework dev server.
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Port of the proxy server.
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Port of the framework dev server.
    #[arg(long = "targetPort", alias = "target-port")]
    target_port: Option<u16>,

    /// Framework to use (`#static` serves the publish directory).
    #[arg(long)]
    framework: Option<String>,

    /// Directory to serve in static mode.
    #[arg(short = 'd', long)]
    dir: Option<PathBuf>,

    /// Functions directory.
    #[arg(short = 'f', long)]
    functions: Option<PathBuf>,

    /// Disable features that need network access.
    #[arg(short = 'o', long)]
    offline: bool,

    /// Start a public live session.
    #[arg(short = 'l', long)]
    live: bool,

    /// Port of the functions runtime.
    #[arg(long = "functionsPort", alias = "functions-port")]
    functions_port: Option<u16>,

    /// Port of the static file server.
    #[arg(long = "staticServerPort", alias = "static-server-port", hide = true)]
    static_server_port: Option<u16>,

    /// Route through the forward proxy with edge handlers.
    #[arg(short = 'e', long = "edgeHandlers", alias = "edge-handlers", hide = true)]
    edge_handlers: bool,

    /// Deprecated alias of `--edgeHandlers`.
    #[arg(short = 't', long = "trafficMesh", alias = "traffic-mesh", hide = true)]
    traffic_mesh: bool,

    /// GeoIP database for the forward proxy.
    #[arg(short = 'g', long = "locationDb", alias = "location-db", hide = true)]
    location_db: Option<PathBuf>,

    /// Start a collaborative graph session.
    #[arg(long, hide = true)]
    graph: bool,

    /// Site configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Linked site id.
    #[arg(long = "siteId", alias = "site-id", env = "NETLIFY_SITE_ID")]
    site_id: Option<String>,

    /// API token.
    #[arg(long, env = "NETLIFY_AUTH_TOKEN", hide_env_values = true)]
    auth: Option<String>,

    /// Never open a browser.
    #[arg(long = "no-open")]
    no_open: bool,

    /// Log output format (text or json).
    #[arg(long = "logFormat", alias = "log-format", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Cli {
    fn dev_options(&self) -> DevOptions {
        DevOptions {
            command: self.command.clone(),
            port: self.port,
            target_port: self.target_port,
            framework: self.framework.clone(),
            dir: self.dir.clone(),
            functions: self.functions.clone(),
            offline: self.offline,
            live: self.live,
            functions_port: self.functions_port,
            static_server_port: self.static_server_port,
            edge_handlers: self.edge_handlers,
            traffic_mesh: self.traffic_mesh,
            location_db: self.location_db.clone(),
            graph: self.graph,
            no_open: self.no_open,
        }
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("netlify-dev bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Resolve configuration ───────────────────────────
    let root = std::env::current_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| root.join("netlify.toml"));
    let site = SiteConfig::load_from_path(&config_path)?;
    let options = args.dev_options();
    let dev_config = DevConfig::resolve(&site, &options);
    let settings = ServerSettings::detect(&dev_config, &root).map_err(|err| {
        error!(%err, "could not resolve server settings");
        err
    })?;

    // ── Shared state ────────────────────────────────────
    let registry = CleanupRegistry::new();
    let _signals = spawn_signal_handler(registry.clone());
    let exports = EnvExports::new();
    let auth = SharedAuth::default();

    let site_id = args.site_id.clone().filter(|id| !id.is_empty());
    let token = if options.offline {
        None
    } else {
        match load_auth_token(args.auth.as_deref()).await {
            Ok(token) => Some(token),
            Err(err) => {
                warn!(%err, "running without API credentials");
                None
            }
        }
    };
    let api = NetlifyApi::from_env(token.clone());

    let site_info = fetch_site(&api, site_id.as_deref()).await;
    let addons_urls = fetch_addons(&api, site_info.as_ref()).await;

    // ── Auth poller ─────────────────────────────────────
    if let (Some(site_id), Some(_)) = (&site_id, &token) {
        let poller = AuthPoller::new(
            site_id.clone(),
            Arc::new(api.clone()),
            Arc::new(CredentialAuthenticator::new(args.auth.clone())),
            Arc::clone(&auth),
            exports.clone(),
        );
        let handle = poller
            .start(site_info.clone(), registry.shutdown_token())
            .await;
        registry.register("stop auth poller", move || async move {
            handle.stop().await;
            Ok(())
        });
    }

    // ── Boot sequence ───────────────────────────────────
    let runner = Arc::new(SupervisedRunner::new(registry.clone(), exports.clone()));
    let gate = Arc::new(PortGate::new(DEFAULT_PORT_TIMEOUT));
    let services = Services {
        static_server: Arc::new(AxumStaticServer::new(&registry)),
        functions: Arc::new(ExternalFunctionsRuntime::from_env(runner.clone())),
        proxy: Arc::new(LocalProxy::new(runner.clone(), gate.clone(), &registry)),
        tunnel: Arc::new(NetlifyLiveTunnel::new(api.base_url(), runner.clone())),
        browser: Arc::new(SystemBrowser),
    };
    let plan = BootPlan {
        forward_proxy: options.use_forward_proxy(),
        live: options.live,
        no_open: options.no_open,
        location_db: options.location_db.clone(),
        site_id: site_id.clone(),
        api_token: token.clone(),
        addons_urls,
        config_path: config_path.clone(),
        root: root.clone(),
    };
    let sequencer = StartupSequencer::new(
        settings,
        plan,
        runner,
        gate,
        services,
        exports,
        registry.clone(),
    );
    if sequencer.run_or_exit().await.is_none() {
        registry.finished().await;
        return Ok(());
    }

    // ── Graph session manager ───────────────────────────
    if options.graph {
        let client = Arc::new(HttpGraphClient::new(api.base_url(), token, auth));
        let manager_options = SessionManagerOptions {
            offline: options.offline,
            site_id,
            root,
            config_path,
            debounce: DEFAULT_DEBOUNCE,
        };
        match start_session_manager(manager_options, &site, client, registry.clone()).await {
            Ok(Some(manager)) => info!(session_id = manager.session_id(), "graph session ready"),
            Ok(None) => {}
            Err(err) => error!(%err, "failed to start graph session"),
        }
    }

    // ── Wait for teardown ───────────────────────────────
    registry.finished().await;
    info!("netlify-dev shut down");
    Ok(())
}

async fn fetch_site(api: &NetlifyApi, site_id: Option<&str>) -> Option<SiteInfo> {
    let site_id = site_id?;
    api.token()?;
    match api.get_site(site_id).await {
        Ok(site) => Some(site),
        Err(err) => {
            warn!(%err, site_id, "could not fetch site information");
            None
        }
    }
}

async fn fetch_addons(api: &NetlifyApi, site: Option<&SiteInfo>) -> BTreeMap<String, String> {
    let Some(site) = site else {
        return BTreeMap::new();
    };
    match api.list_service_instances(&site.id).await {
        Ok(instances) => instances
            .into_iter()
            .map(|instance| (instance.service_slug, instance.url))
            .collect(),
        Err(err) => {
            warn!(%err, "could not fetch add-ons; proxy will not route to them");
            BTreeMap::new()
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
