//! Local services started by the sequencer.
//!
//! Each collaborator sits behind a trait so the boot order can be driven
//! against fakes. The concrete implementations are deliberately thin.

pub mod browser;
pub mod functions;
pub mod proxy;
pub mod static_server;
pub mod tunnel;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use crate::config::ServerSettings;
use crate::exports::EnvExports;
use crate::Result;

pub use browser::SystemBrowser;
pub use functions::ExternalFunctionsRuntime;
pub use proxy::LocalProxy;
pub use static_server::AxumStaticServer;
pub use tunnel::NetlifyLiveTunnel;

/// Boxed future returned by service starters.
pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Serves the publish directory when there is no framework command.
pub trait StaticServer: Send + Sync {
    /// Bind `port` and serve `dist` until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be bound.
    fn start<'a>(&'a self, dist: &'a Path, port: u16) -> ServiceFuture<'a, ()>;
}

/// Serverless functions runtime.
pub trait FunctionsRuntime: Send + Sync {
    /// Start the runtime for `settings`.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be launched.
    fn start<'a>(
        &'a self,
        settings: &'a ServerSettings,
        exports: &'a EnvExports,
    ) -> ServiceFuture<'a, ()>;
}

/// Inputs of the default reverse proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyParams {
    /// Port the proxy listens on.
    pub port: u16,
    /// Port of the framework or static server.
    pub framework_port: u16,
    /// Port of the functions runtime.
    pub functions_port: u16,
    /// Add-on slug to upstream URL.
    pub addons_urls: BTreeMap<String, String>,
    /// Site config file.
    pub config_path: PathBuf,
    /// Site root.
    pub root: PathBuf,
}

/// Inputs of the traffic-mesh forward proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardProxyParams {
    /// Port the proxy listens on.
    pub port: u16,
    /// Port of the framework or static server.
    pub framework_port: u16,
    /// Port of the functions runtime.
    pub functions_port: u16,
    /// Publish directory.
    pub publish_dir: PathBuf,
    /// Site config file.
    pub config_path: PathBuf,
    /// GeoIP database location.
    pub geo_db: Option<PathBuf>,
    /// Secret used to verify identity JWTs.
    pub jwt_secret: Option<String>,
    /// Claim path holding the role list.
    pub jwt_role_path: Option<String>,
}

/// Request routing front-end.
pub trait ProxyServer: Send + Sync {
    /// Start the reverse proxy. `None` means it could not be bound.
    ///
    /// # Errors
    ///
    /// Returns an error for failures other than binding.
    fn start_proxy<'a>(&'a self, params: &'a ProxyParams) -> ServiceFuture<'a, Option<String>>;

    /// Start the forward proxy. `None` means it never became reachable.
    ///
    /// # Errors
    ///
    /// Returns an error for failures other than reachability.
    fn start_forward_proxy<'a>(
        &'a self,
        params: &'a ForwardProxyParams,
    ) -> ServiceFuture<'a, Option<String>>;
}

/// Inputs of the public tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelParams {
    /// Site the tunnel session belongs to.
    pub site_id: String,
    /// API token.
    pub token: String,
    /// Local port exposed through the tunnel.
    pub local_port: u16,
}

/// Public relay for the local proxy.
pub trait LiveTunnel: Send + Sync {
    /// Open the tunnel and return its public URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the tunnel cannot be established.
    fn start<'a>(&'a self, params: &'a TunnelParams) -> ServiceFuture<'a, String>;
}

/// Opens URLs in the user's browser.
pub trait BrowserLauncher: Send + Sync {
    /// Open `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if no browser could be launched.
    fn open(&self, url: &str) -> Result<()>;
}

/// The collaborators the sequencer drives.
#[derive(Clone)]
pub struct Services {
    /// Static file server.
    pub static_server: Arc<dyn StaticServer>,
    /// Functions runtime.
    pub functions: Arc<dyn FunctionsRuntime>,
    /// Proxy front-end.
    pub proxy: Arc<dyn ProxyServer>,
    /// Public tunnel.
    pub tunnel: Arc<dyn LiveTunnel>,
    /// Browser launcher.
    pub browser: Arc<dyn BrowserLauncher>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}
