//! Static file server for sites without a framework command.

use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ServiceFuture, StaticServer};
use crate::cleanup::CleanupRegistry;
use crate::{AppError, Result};

/// [`StaticServer`] backed by `axum`, stopped when teardown begins.
#[derive(Debug, Clone)]
pub struct AxumStaticServer {
    shutdown: CancellationToken,
}

impl AxumStaticServer {
    /// Server that shuts down with `registry`.
    #[must_use]
    pub fn new(registry: &CleanupRegistry) -> Self {
        Self {
            shutdown: registry.shutdown_token(),
        }
    }

    /// Bind `port` on localhost and serve `dist` on a background task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the port cannot be bound.
    pub async fn serve(&self, dist: &Path, port: u16) -> Result<SocketAddr> {
        let bind = SocketAddr::from(([127, 0, 0, 1], port));
        let listener = tokio::net::TcpListener::bind(bind)
            .await
            .map_err(|err| AppError::Io(format!("failed to bind static server on {bind}: {err}")))?;
        let local = listener.local_addr()?;

        let router = router(dist.to_path_buf());
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            match served {
                Ok(()) => debug!("static server shut down"),
                Err(err) => warn!(%err, "static server error"),
            }
        });

        info!(addr = %local, dist = %dist.display(), "static server listening");
        Ok(local)
    }
}

impl StaticServer for AxumStaticServer {
    fn start<'a>(&'a self, dist: &'a Path, port: u16) -> ServiceFuture<'a, ()> {
        Box::pin(async move { self.serve(dist, port).await.map(|_addr| ()) })
    }
}

/// Router serving files below `dist`.
#[must_use]
pub fn router(dist: PathBuf) -> Router {
    Router::new().fallback(serve_file).with_state(Arc::new(dist))
}

async fn serve_file(State(dist): State<Arc<PathBuf>>, uri: Uri) -> Response {
    let Some(relative) = sanitize(uri.path()) else {
        return StatusCode::FORBIDDEN.into_response();
    };
    let mut path = dist.join(relative);
    if tokio::fs::metadata(&path)
        .await
        .is_ok_and(|meta| meta.is_dir())
    {
        path.push("index.html");
    }

    match tokio::fs::read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, content_type(&path))], bytes).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Relative file path for a request path, or `None` if it escapes the root.
fn sanitize(request_path: &str) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in Path::new(request_path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(clean)
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain; charset=utf-8",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}
