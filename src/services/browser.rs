//! Browser auto-launch.

use tracing::debug;

use super::BrowserLauncher;
use crate::{AppError, Result};

/// Opens URLs with the platform's default handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> Result<()> {
        debug!(url, "opening browser");
        webbrowser::open(url)
            .map_err(|err| AppError::Process(format!("failed to open browser at {url}: {err}")))
    }
}
