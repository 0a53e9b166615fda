//! API authentication state shared between the auth poller and the graph
//! session manager.

pub mod credentials;
pub mod jwt;
pub mod poller;

use std::sync::Arc;

use tokio::sync::RwLock;

/// Credentials the graph feature runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphAuthConfig {
    /// Hosting API token.
    pub netlify_token: String,
    /// Remote-assigned authentication token id.
    pub authlify_token_id: String,
    /// Site the token belongs to.
    pub site_id: String,
}

/// Mutable authentication state. Writers replace whole fields; last writer
/// wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    /// Active graph credentials, if API authentication is enabled.
    pub graph_config: Option<GraphAuthConfig>,
    /// Most recently injected signed credential.
    pub graph_token: Option<String>,
}

impl AuthContext {
    /// Token id currently cached, if any.
    #[must_use]
    pub fn cached_token_id(&self) -> Option<&str> {
        self.graph_config
            .as_ref()
            .map(|config| config.authlify_token_id.as_str())
    }
}

/// Shared handle to the authentication state.
pub type SharedAuth = Arc<RwLock<AuthContext>>;
