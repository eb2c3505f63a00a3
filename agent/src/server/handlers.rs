//! HTTP request handlers

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{error, info, warn};

use crate::activity::fsm::MonitorState;
use crate::camera::settings::CameraSettings;
use crate::capture::controller::{ControllerStatus, StartRequest, StateUpdate};
use crate::capture::session::{FrameEntry, SessionSummary};
use crate::errors::AgentError;
use crate::server::state::ServerState;
use crate::storage::state::ControllerState;
use crate::utils::version_info;
use crate::video::encoder::VideoOutcome;
use crate::video::progress::ProgressRecord;

/// Error body returned by every failing handler
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl AgentError {
    /// HTTP status matching the error kind
    pub fn status_code(&self) -> StatusCode {
        match self {
            AgentError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AgentError::NotFound(_) => StatusCode::NOT_FOUND,
            AgentError::Conflict(_) => StatusCode::CONFLICT,
            AgentError::CameraUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

// ============================== HEALTH & VERSION ================================ //

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "timelapser".to_string(),
        version: version.version,
    })
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

// ================================== CAPTURE ===================================== //

/// Status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub capture: ControllerStatus,
    pub activity_state: MonitorState,
    pub current_activity_file: Option<String>,
    pub video_jobs: Vec<String>,
}

pub async fn status_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(StatusResponse {
        capture: state.controller().status().await,
        activity_state: state.monitor().state(),
        current_activity_file: state.monitor().current_file(),
        video_jobs: state.app.encoder.active_jobs(),
    })
}

/// Result of a start or stop request
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

pub async fn start_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<StartRequest>,
) -> Result<impl IntoResponse, AgentError> {
    let started = state.controller().start(request).await?;
    let message = if started {
        "Timelapse started"
    } else {
        "Timelapse already running"
    };
    Ok(Json(ActionResponse {
        success: started,
        message: message.to_string(),
    }))
}

pub async fn stop_handler(State(state): State<Arc<ServerState>>) -> Result<impl IntoResponse, AgentError> {
    let stopped = state.controller().stop().await?;
    let message = if stopped {
        "Timelapse stopped"
    } else {
        "Timelapse not running"
    };
    Ok(Json(ActionResponse {
        success: stopped,
        message: message.to_string(),
    }))
}

pub async fn get_state_handler(State(state): State<Arc<ServerState>>) -> Json<ControllerState> {
    Json(state.controller().state())
}

pub async fn update_state_handler(
    State(state): State<Arc<ServerState>>,
    Json(update): Json<StateUpdate>,
) -> Result<Json<ControllerState>, AgentError> {
    Ok(Json(state.controller().update_state(update).await?))
}

/// Ignore patterns request and response
#[derive(Debug, Serialize, Deserialize)]
pub struct IgnorePatterns {
    pub patterns: Vec<String>,
}

pub async fn get_ignore_patterns_handler(State(state): State<Arc<ServerState>>) -> Json<IgnorePatterns> {
    Json(IgnorePatterns {
        patterns: state.monitor().ignored_patterns(),
    })
}

pub async fn set_ignore_patterns_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<IgnorePatterns>,
) -> Json<IgnorePatterns> {
    state.app.set_ignored_patterns(request.patterns).await;
    Json(IgnorePatterns {
        patterns: state.monitor().ignored_patterns(),
    })
}

// ================================== CAMERAS ===================================== //

/// Camera selection in a request body
#[derive(Debug, Default, Deserialize)]
pub struct CameraRequest {
    #[serde(default)]
    pub camera: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct CamerasResponse {
    pub cameras: Vec<String>,
}

pub async fn cameras_handler(State(state): State<Arc<ServerState>>) -> Json<CamerasResponse> {
    Json(CamerasResponse {
        cameras: state.app.cameras.list_devices(),
    })
}

#[derive(Debug, Serialize)]
pub struct PreInitializeResponse {
    pub success: bool,
    pub camera: String,
}

pub async fn pre_initialize_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<CameraRequest>,
) -> Result<impl IntoResponse, AgentError> {
    let camera = state
        .controller()
        .pre_initialize_camera(request.camera.as_ref())
        .await?;
    Ok(Json(PreInitializeResponse {
        success: true,
        camera: camera.to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct TestCaptureResponse {
    pub image: String,
}

pub async fn test_capture_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<CameraRequest>,
) -> Result<impl IntoResponse, AgentError> {
    let image = state.controller().test_capture(request.camera.as_ref()).await?;
    Ok(Json(TestCaptureResponse { image }))
}

pub async fn camera_settings_handler(
    State(state): State<Arc<ServerState>>,
    Json(settings): Json<CameraSettings>,
) -> Json<CameraSettings> {
    Json(state.controller().update_camera_settings(settings).await)
}

// ================================= SESSIONS ===================================== //

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionSummary>,
}

pub async fn sessions_handler(State(state): State<Arc<ServerState>>) -> Json<SessionsResponse> {
    Json(SessionsResponse {
        sessions: state.controller().list_sessions().await,
    })
}

#[derive(Debug, Serialize)]
pub struct FramesResponse {
    pub session_id: String,
    pub frames: Vec<FrameEntry>,
}

pub async fn session_frames_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AgentError> {
    let frames = state.controller().session_frames(&id).await?;
    Ok(Json(FramesResponse { session_id: id, frames }))
}

pub async fn delete_session_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AgentError> {
    state.controller().delete_session(&id).await?;
    Ok(Json(ActionResponse {
        success: true,
        message: format!("Deleted session {}", id),
    }))
}

/// Serve one file of a session, such as a frame or the thumbnail
pub async fn session_image_handler(
    State(state): State<Arc<ServerState>>,
    Path((session_id, file)): Path<(String, String)>,
    request: Request,
) -> Result<Response, AgentError> {
    let path = state.controller().session_file(&session_id, &file).await?;
    serve_file(path, request).await
}

/// Serve a session's finished video
pub async fn session_video_handler(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
    request: Request,
) -> Result<Response, AgentError> {
    let path = state.controller().session_video(&session_id).await?;
    serve_file(path, request).await
}

async fn serve_file(path: PathBuf, request: Request) -> Result<Response, AgentError> {
    match ServeFile::new(&path).oneshot(request).await {
        Ok(response) => Ok(response.into_response()),
        Err(e) => Err(AgentError::Internal(format!("failed to serve {}: {}", path.display(), e))),
    }
}

// =================================== VIDEO ====================================== //

#[derive(Debug, Default, Deserialize)]
pub struct CreateVideoRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub fps: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CreateVideoResponse {
    pub session_id: String,
    pub output: PathBuf,
    pub total_frames: usize,
}

/// Starts the encode and returns at once; progress is polled separately
pub async fn create_video_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<CreateVideoRequest>,
) -> Result<impl IntoResponse, AgentError> {
    let job = state
        .controller()
        .create_video(request.session_id.as_deref(), request.fps)
        .await?;

    let response = CreateVideoResponse {
        session_id: job.session_id.clone(),
        output: job.output.clone(),
        total_frames: job.total_frames,
    };

    let session_id = job.session_id;
    let handle = job.handle;
    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(VideoOutcome::Completed(path))) => {
                info!("Video for {} written to {}", session_id, path.display())
            }
            Ok(Ok(VideoOutcome::Cancelled)) => info!("Video for {} cancelled", session_id),
            Ok(Err(e)) => warn!("Video for {} failed: {}", session_id, e),
            Err(e) => error!("Video task for {} ended abnormally: {}", session_id, e),
        }
    });

    Ok((StatusCode::ACCEPTED, Json(response)))
}

#[derive(Debug, Serialize)]
pub struct CancelVideoResponse {
    pub session_id: String,
    pub cancelled: bool,
}

pub async fn cancel_video_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AgentError> {
    let cancelled = state.controller().cancel_video(&id)?;
    Ok(Json(CancelVideoResponse {
        session_id: id,
        cancelled,
    }))
}

pub async fn video_progress_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<ProgressRecord>, AgentError> {
    match state.controller().video_progress(&id).await? {
        Some(record) => Ok(Json(record)),
        None => Err(AgentError::NotFound(format!("no video progress for {}", id))),
    }
}
