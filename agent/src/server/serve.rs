//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::AgentError;
use crate::server::handlers::{
    camera_settings_handler, cameras_handler, cancel_video_handler, create_video_handler,
    delete_session_handler, get_ignore_patterns_handler, get_state_handler, health_handler,
    pre_initialize_handler, session_frames_handler, session_image_handler, session_video_handler,
    sessions_handler, set_ignore_patterns_handler, start_handler, status_handler, stop_handler,
    test_capture_handler, update_state_handler, version_handler, video_progress_handler,
};
use crate::server::state::ServerState;

/// Build the router with every route attached
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Capture
        .route("/status", get(status_handler))
        .route("/start", post(start_handler))
        .route("/stop", post(stop_handler))
        .route("/state", get(get_state_handler).post(update_state_handler))
        .route(
            "/ignore_patterns",
            get(get_ignore_patterns_handler).post(set_ignore_patterns_handler),
        )
        // Cameras
        .route("/cameras", get(cameras_handler))
        .route("/pre_initialize_camera", post(pre_initialize_handler))
        .route("/test_capture", post(test_capture_handler))
        .route("/camera_settings", post(camera_settings_handler))
        // Sessions
        .route("/sessions", get(sessions_handler))
        .route("/sessions/{id}", delete(delete_session_handler))
        .route("/sessions/{id}/frames", get(session_frames_handler))
        .route("/image/{id}/{file}", get(session_image_handler))
        // Video
        .route("/create_video", post(create_video_handler))
        .route("/cancel_video/{id}", post(cancel_video_handler))
        .route("/video_progress/{id}", get(video_progress_handler))
        .route("/video/{id}", get(session_video_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), AgentError>>, AgentError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| AgentError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| AgentError::ServerError(e.to_string()))
    });

    Ok(handle)
}
