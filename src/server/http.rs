use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::handlers::{
    create_analysis, create_comparison, delete_comparison, get_analysis, get_comparison,
    health_check, list_analyses, list_comparisons,
};
use super::SharedState;
use crate::error::{AppError, AppResult};

/// Build the application router.
pub fn create_router(state: SharedState) -> Router {
    let insights = Router::new()
        .route("/analyses", get(list_analyses).post(create_analysis))
        .route("/analyses/:id", get(get_analysis))
        .route(
            "/comparisons",
            get(list_comparisons).post(create_comparison),
        )
        .route(
            "/comparisons/:id",
            get(get_comparison).delete(delete_comparison),
        );

    Router::new()
        .route("/health", get(health_check))
        .nest("/insights", insights)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router until `shutdown` resolves.
pub async fn serve(
    state: SharedState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> AppResult<()> {
    let addr = state.config.server.bind_addr()?;
    let listener = TcpListener::bind(addr).await.map_err(|e| AppError::Internal {
        message: format!("Failed to bind {}: {}", addr, e),
    })?;

    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| AppError::Internal {
            message: format!("HTTP server error: {}", e),
        })
}
