//! Collaborative graph session model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Observable state of the session lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No session has been established yet.
    NoSession,
    /// A session is active under the given id.
    Active(String),
}

impl SessionState {
    /// Active session id, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::NoSession => None,
            Self::Active(id) => Some(id),
        }
    }
}

/// Session record returned by the remote session service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraphSession {
    /// Opaque session identifier.
    pub id: String,
    /// Whether the remote side still considers the session live.
    #[serde(default)]
    pub status: Option<String>,
}

impl GraphSession {
    /// Whether the session can be resumed. Sessions without a status are
    /// treated as live.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.as_deref() != Some("inactive")
    }
}

/// Event pushed by the remote side to a watched session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEvent {
    /// Event identifier.
    pub id: String,
    /// Event type name.
    pub kind: String,
    /// Creation time on the remote side.
    pub created_at: DateTime<Utc>,
    /// Free-form payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}
