pub mod error;
pub mod handlers;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use reminder_core::error::{RemindError, Result};
use reminder_core::log;
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use state::AppState;

const DEFAULT_REQUEST_TIMEOUT_SEC: u64 = 30;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/reminders/health", get(handlers::health_handler))
        .route("/api/reminders", post(handlers::create_handler).get(handlers::list_handler))
        .route("/api/reminders/{id}", get(handlers::get_handler))
        .route("/api/reminders/{id}/action", post(handlers::action_handler))
        .route("/api/reminders/undo", post(handlers::undo_handler))
        .route("/api/reminders/undo_last", post(handlers::undo_last_handler))
        .route("/api/reminders/drafts/{draft_id}/modify", post(handlers::modify_draft_handler))
        .route("/api/reminders/drafts/{draft_id}/confirm", post(handlers::confirm_draft_handler))
        .layer(TimeoutLayer::new(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SEC)))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve the callback endpoint. `shutdown` resolves once, at which
/// point axum stops accepting new connections and waits for in-flight
/// requests to finish before this function returns.
pub async fn serve(bind_addr: &str, state: Arc<AppState>, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| RemindError::Config(format!("failed to bind {bind_addr}: {e}")))?;

    log!(" [server] listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            log!(" [server] shutdown signal received, draining in-flight requests");
        })
        .await
        .map_err(|e| RemindError::Store(format!("server error: {e}")))?;

    Ok(())
}
