//! Local session state persisted under the site root.
//!
//! The session id lives in `.netlify/state.json` next to whatever other
//! keys the file already carries; those are preserved on write.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::warn;

use crate::{AppError, Result};

const STATE_DIR: &str = ".netlify";
const STATE_FILE: &str = "state.json";
const SESSION_KEY: &str = "graphSessionId";

/// JSON state file for one site root.
#[derive(Debug, Clone)]
pub struct LocalState {
    path: PathBuf,
}

impl LocalState {
    /// State file for the site rooted at `root`.
    #[must_use]
    pub fn for_site_root(root: &Path) -> Self {
        Self {
            path: root.join(STATE_DIR).join(STATE_FILE),
        }
    }

    /// Location of the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Previously stored session id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file exists but cannot be read.
    pub fn load_session_id(&self) -> Result<Option<String>> {
        Ok(self
            .read_map()?
            .get(SESSION_KEY)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_owned))
    }

    /// Store `session_id`, keeping unrelated keys.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be written.
    pub fn save_session_id(&self, session_id: &str) -> Result<()> {
        let mut map = self.read_map()?;
        map.insert(SESSION_KEY.to_owned(), Value::String(session_id.to_owned()));
        self.write_map(&map)
    }

    fn read_map(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let raw = fs::read_to_string(&self.path)
            .map_err(|err| AppError::Io(format!("failed to read local state: {err}")))?;
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) | Err(_) => {
                warn!(path = %self.path.display(), "local state is not a JSON object; starting fresh");
                Ok(Map::new())
            }
        }
    }

    fn write_map(&self, map: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| AppError::Io(format!("failed to create state dir: {err}")))?;
        }
        let raw = serde_json::to_string_pretty(map)
            .map_err(|err| AppError::Io(format!("failed to encode local state: {err}")))?;
        fs::write(&self.path, raw)
            .map_err(|err| AppError::Io(format!("failed to write local state: {err}")))
    }
}
