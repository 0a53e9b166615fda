//! Remote site records returned by the hosting API.

use serde::{Deserialize, Serialize};

/// Site snapshot as returned by `GET /sites/{id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SiteInfo {
    /// Site identifier.
    pub id: String,
    /// Human-readable site name.
    #[serde(default)]
    pub name: String,
    /// Primary production URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Identifier of the currently issued API-authentication token, if the
    /// feature is enabled for the site.
    #[serde(default)]
    pub authlify_token_id: Option<String>,
}

impl SiteInfo {
    /// Non-empty authentication token id, if any.
    #[must_use]
    pub fn auth_token_id(&self) -> Option<&str> {
        self.authlify_token_id
            .as_deref()
            .filter(|id| !id.is_empty())
    }
}

/// Add-on instance attached to a site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceInstance {
    /// Add-on slug, used as the proxy path segment.
    pub service_slug: String,
    /// Upstream URL of the add-on.
    pub url: String,
}

/// Public tunnel session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LiveSession {
    /// Session identifier.
    pub id: String,
    /// Public URL announced to the operator.
    pub session_url: String,
    /// Connection state (`online` once the tunnel client is connected).
    #[serde(default)]
    pub state: Option<String>,
}

impl LiveSession {
    /// Whether the tunnel client has connected.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.state.as_deref() == Some("online")
    }
}
