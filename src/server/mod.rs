//! HTTP request surface of the daemon
//!
//! Served over a unix socket in production and over TCP for local testing.

pub mod handlers;
pub mod state;

pub use handlers::{create_router, ApiFailure, REQUEST_ID_HEADER};
pub use state::AppState;

use std::path::Path;

use axum::Router;
use tokio::net::{TcpListener, UnixListener};
use tracing::info;

use crate::config::ListenAddr;

/// Bind `addr` and serve `app` until the server fails
pub async fn serve(addr: &ListenAddr, app: Router) -> std::io::Result<()> {
    match addr {
        ListenAddr::Tcp(addr) => {
            let listener = TcpListener::bind(addr).await?;
            info!("Server listening on {}", listener.local_addr()?);
            axum::serve(listener, app).await
        }
        ListenAddr::Unix(path) => {
            let listener = bind_unix(path).await?;
            info!("Server listening on unix:{}", path.display());
            axum::serve(listener, app).await
        }
    }
}

/// Bind a unix socket, replacing a stale socket file from a previous run
async fn bind_unix(path: &Path) -> std::io::Result<UnixListener> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!("Removed stale socket {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    UnixListener::bind(path)
}
