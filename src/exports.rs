//! Computed values shared with downstream consumers.
//!
//! URLs and credentials produced at runtime are written to an explicit
//! [`EnvExports`] structure that is handed to whichever component needs
//! them (child processes, the functions runtime). The process environment
//! is never written; children receive a [`EnvExports::snapshot`] at spawn.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

/// Resulting service URL.
pub const URL: &str = "URL";
/// Resulting service URL (alias read by deploy tooling).
pub const DEPLOY_URL: &str = "DEPLOY_URL";
/// Public tunnel URL when running live.
pub const BASE_URL: &str = "BASE_URL";
/// Current signed graph credential for downstream functions.
pub const NETLIFY_GRAPH_TOKEN: &str = "NETLIFY_GRAPH_TOKEN";
/// Deprecated alias of [`NETLIFY_GRAPH_TOKEN`].
pub const ONEGRAPH_AUTHLIFY_TOKEN: &str = "ONEGRAPH_AUTHLIFY_TOKEN";

/// Shared, cloneable map of exported values.
#[derive(Debug, Clone, Default)]
pub struct EnvExports {
    vars: Arc<RwLock<BTreeMap<String, String>>>,
}

impl EnvExports {
    /// Empty export map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`.
    pub fn set(&self, key: &str, value: &str) {
        self.write().insert(key.to_owned(), value.to_owned());
        debug!(key, "exported value");
    }

    /// Remove `key` if present.
    pub fn remove(&self, key: &str) {
        self.write().remove(key);
    }

    /// Current value of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.read().get(key).cloned()
    }

    /// Copy of every exported value, for handing to a child environment.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.read().clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, String>> {
        self.vars
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, String>> {
        self.vars
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
