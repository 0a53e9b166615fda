//! Ordered boot of the local development services.
//!
//! Functions runtime, then the framework (or static) server, then the
//! proxy, then the optional tunnel and browser. Every step that fails to
//! establish its resource is fatal; browser launch failures are ignored.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info, info_span, Instrument};

use super::port_gate::ReadinessGate;
use super::supervisor::CommandRunner;
use crate::cleanup::{CleanupRegistry, FATAL_EXIT_CODE};
use crate::config::ServerSettings;
use crate::exports::{EnvExports, BASE_URL, DEPLOY_URL, URL};
use crate::services::{ForwardProxyParams, ProxyParams, Services, TunnelParams};
use crate::{AppError, Result};

/// What to boot, beyond the detected server settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootPlan {
    /// Use the forward proxy instead of the reverse proxy.
    pub forward_proxy: bool,
    /// Open a public tunnel.
    pub live: bool,
    /// Never open a browser.
    pub no_open: bool,
    /// GeoIP database for the forward proxy.
    pub location_db: Option<PathBuf>,
    /// Linked site.
    pub site_id: Option<String>,
    /// API token.
    pub api_token: Option<String>,
    /// Add-on slug to upstream URL.
    pub addons_urls: BTreeMap<String, String>,
    /// Site config file.
    pub config_path: PathBuf,
    /// Site root.
    pub root: PathBuf,
}

/// Drives the boot order.
pub struct StartupSequencer {
    settings: ServerSettings,
    plan: BootPlan,
    runner: Arc<dyn CommandRunner>,
    gate: Arc<dyn ReadinessGate>,
    services: Services,
    exports: EnvExports,
    registry: CleanupRegistry,
}

impl std::fmt::Debug for StartupSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartupSequencer")
            .field("settings", &self.settings)
            .field("plan", &self.plan)
            .finish_non_exhaustive()
    }
}

impl StartupSequencer {
    /// Sequencer over the given collaborators.
    #[must_use]
    pub fn new(
        settings: ServerSettings,
        plan: BootPlan,
        runner: Arc<dyn CommandRunner>,
        gate: Arc<dyn ReadinessGate>,
        services: Services,
        exports: EnvExports,
        registry: CleanupRegistry,
    ) -> Self {
        Self {
            settings,
            plan,
            runner,
            gate,
            services,
            exports,
            registry,
        }
    }

    /// Boot everything and return the announced URL.
    ///
    /// # Errors
    ///
    /// Returns the error of the first step that could not establish its
    /// resource: `PortTimeout` for the framework port, `ProxyBind` when no
    /// proxy URL was produced, or the collaborator's own error.
    pub async fn run(&self) -> Result<String> {
        let span = info_span!("startup", port = self.settings.port);
        async {
            self.services
                .functions
                .start(&self.settings, &self.exports)
                .await?;
            self.start_framework().await?;

            let proxy_url = self.start_proxy().await?;
            let url = if self.plan.live {
                let tunnel_url = self.start_tunnel().await?;
                self.exports.set(BASE_URL, &tunnel_url);
                tunnel_url
            } else {
                proxy_url
            };

            if self.settings.auto_launch && !self.plan.no_open {
                if let Err(err) = self.services.browser.open(&url) {
                    debug!(%err, "browser launch failed");
                }
            }

            self.exports.set(URL, &url);
            self.exports.set(DEPLOY_URL, &url);
            info!("Server now ready on {url}");
            Ok(url)
        }
        .instrument(span)
        .await
    }

    /// Boot, routing any failure through a single fatal teardown.
    ///
    /// Returns `None` if teardown was requested.
    pub async fn run_or_exit(&self) -> Option<String> {
        match self.run().await {
            Ok(url) => Some(url),
            Err(err) => {
                error!(%err, "startup failed");
                self.registry.run_once(FATAL_EXIT_CODE).await;
                None
            }
        }
    }

    async fn start_framework(&self) -> Result<()> {
        let settings = &self.settings;
        if settings.use_static_server {
            if let Some(command) = &settings.command {
                self.runner.run(command, &settings.env)?;
            }
            self.services
                .static_server
                .start(&settings.dist, settings.framework_port)
                .await?;
            info!(
                port = settings.framework_port,
                dist = %settings.dist.display(),
                "static server started"
            );
            return Ok(());
        }

        let command = settings.command.as_deref().ok_or_else(|| {
            AppError::Config("no command to run for the framework server".into())
        })?;
        self.runner.run(command, &settings.env)?;
        info!(port = settings.framework_port, "waiting for framework port");

        let port = settings.framework_port;
        if let Err(err) = self.gate.wait(port, settings.wait_protocol).await {
            error!(%err, "Netlify Dev could not connect to localhost:{port}");
            error!("Please make sure your server is running on port {port}");
            return Err(err);
        }
        info!(port, "framework server reachable");
        Ok(())
    }

    async fn start_proxy(&self) -> Result<String> {
        let settings = &self.settings;
        let url = if self.plan.forward_proxy {
            let params = ForwardProxyParams {
                port: settings.port,
                framework_port: settings.framework_port,
                functions_port: settings.functions_port,
                publish_dir: settings.dist.clone(),
                config_path: self.plan.config_path.clone(),
                geo_db: self.plan.location_db.clone(),
                jwt_secret: settings.jwt_secret.clone(),
                jwt_role_path: settings.jwt_role_path.clone(),
            };
            self.services.proxy.start_forward_proxy(&params).await?
        } else {
            let params = ProxyParams {
                port: settings.port,
                framework_port: settings.framework_port,
                functions_port: settings.functions_port,
                addons_urls: self.plan.addons_urls.clone(),
                config_path: self.plan.config_path.clone(),
                root: self.plan.root.clone(),
            };
            self.services.proxy.start_proxy(&params).await?
        };

        url.ok_or_else(|| {
            AppError::ProxyBind(format!("Unable to start proxy server on port {}", settings.port))
        })
    }

    async fn start_tunnel(&self) -> Result<String> {
        let (Some(site_id), Some(token)) = (&self.plan.site_id, &self.plan.api_token) else {
            return Err(AppError::Config(
                "a live tunnel needs a linked site and an API token".into(),
            ));
        };
        let params = TunnelParams {
            site_id: site_id.clone(),
            token: token.clone(),
            local_port: self.settings.port,
        };
        self.services.tunnel.start(&params).await
    }
}
