//! Web server module.

mod handlers;

pub use handlers::*;

use crate::monitor::Monitor;
use crate::registry::TargetStore;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<Monitor>,
    pub store: TargetStore,
}

/// Build the router with all routes.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        // Targets
        .route("/api/targets", get(handlers::handle_get_targets).put(handlers::handle_put_targets))
        .route("/api/targets/{id}/refresh", post(handlers::handle_refresh_target))
        .route("/api/refresh", post(handlers::handle_refresh_all))
        .route("/api/resume", post(handlers::handle_resume))
        // Statistics
        .route("/api/summary", get(handlers::handle_get_summaries))
        .route("/api/summary/{id}", get(handlers::handle_get_summary))
        // Probing
        .route("/api/probe", post(handlers::handle_probe))
        .route("/api/capabilities", get(handlers::handle_capabilities))
        .route("/api/events", get(handlers::handle_events))
        .route("/api/status", get(handlers::handle_status))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
        .with_state(state)
}

/// Web server for PulseWatch.
pub struct Server {
    port: u16,
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(port: u16, monitor: Arc<Monitor>, store: TargetStore) -> Self {
        Self {
            port,
            state: AppState { monitor, store },
        }
    }

    /// Serve on the configured port until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let router = router(self.state.clone());

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).with_graceful_shutdown(shutdown).await?;

        Ok(())
    }
}
