//! Capture controller: session lifecycle and the frame loop

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::activity::monitor::ActivityListener;
use crate::camera::manager::CameraManager;
use crate::camera::reference::CameraRef;
use crate::camera::settings::CameraSettings;
use crate::capture::session::{
    self, create_session_dir, frame_file_name, validate_file_name, validate_session_id, FrameEntry, SessionInfo,
    SessionSummary, SESSION_INFO_FILE,
};
use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::storage::layout::StorageLayout;
use crate::storage::state::ControllerState;
use crate::video::encoder::{video_path, VideoEncoder, VideoJob, PROGRESS_FILE};
use crate::video::progress::{read_progress, ProgressRecord};

const WAIT_SLICE: Duration = Duration::from_millis(100);
const MIN_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Controller options
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub layout: StorageLayout,

    /// Frame rate used when a video request does not name one
    pub default_fps: u32,
}

/// Parameters of a start request; unset fields keep the stored value
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub camera: Option<Value>,
    #[serde(default)]
    pub interval: Option<f64>,
    #[serde(default)]
    pub auto_mode: Option<bool>,
    #[serde(default)]
    pub activity_file: Option<String>,
}

/// Partial update of the stored controller state
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateUpdate {
    #[serde(default)]
    pub auto_mode: Option<bool>,
    #[serde(default)]
    pub camera: Option<Value>,
    #[serde(default)]
    pub interval: Option<f64>,
}

/// Snapshot reported to clients
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub is_capturing: bool,
    pub current_session: Option<String>,
    pub frame_count: Option<u64>,
    pub latest_frame: Option<String>,
    pub interval: f64,
    pub auto_mode: bool,
    pub selected_camera: Value,
    pub camera_settings: CameraSettings,
    pub available_cameras: Vec<String>,
}

/// The session currently capturing
struct ActiveSession {
    id: String,
    dir: Dir,
    camera: CameraRef,
    interval: Duration,
    started_at: DateTime<Utc>,
    frame_count: AtomicU64,
    latest_frame: Mutex<Option<String>>,
}

struct ActiveCapture {
    session: Arc<ActiveSession>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Capture controller
pub struct CaptureController {
    options: ControllerOptions,
    cameras: Arc<CameraManager>,
    encoder: Arc<VideoEncoder>,
    config: RwLock<ControllerState>,
    lifecycle: tokio::sync::Mutex<Option<ActiveCapture>>,
}

impl CaptureController {
    pub fn new(
        options: ControllerOptions,
        cameras: Arc<CameraManager>,
        encoder: Arc<VideoEncoder>,
        initial: ControllerState,
    ) -> Self {
        Self {
            options,
            cameras,
            encoder,
            config: RwLock::new(initial),
            lifecycle: tokio::sync::Mutex::new(None),
        }
    }

    fn timelapse_dir(&self) -> Dir {
        self.options.layout.timelapse_dir()
    }

    /// Copy of the stored state
    pub fn state(&self) -> ControllerState {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn auto_mode(&self) -> bool {
        self.config.read().unwrap_or_else(|e| e.into_inner()).auto_mode
    }

    fn modify<F>(&self, f: F) -> ControllerState
    where
        F: FnOnce(&mut ControllerState),
    {
        let mut config = self.config.write().unwrap_or_else(|e| e.into_inner());
        f(&mut config);
        config.clone()
    }

    async fn persist(&self, state: &ControllerState) {
        if let Err(e) = state.save(&self.options.layout.state_file()).await {
            error!("Failed to save controller state: {}", e);
        }
    }

    /// Apply a partial state update and persist it
    pub async fn update_state(&self, update: StateUpdate) -> Result<ControllerState, AgentError> {
        if let Some(interval) = update.interval {
            validate_interval(interval)?;
        }
        let state = self.modify(|config| {
            if let Some(auto_mode) = update.auto_mode {
                config.auto_mode = auto_mode;
            }
            if let Some(camera) = update.camera {
                config.camera = camera;
            }
            if let Some(interval) = update.interval {
                config.interval = interval;
            }
        });
        self.persist(&state).await;
        Ok(state)
    }

    /// Store ignore patterns alongside the rest of the state
    pub async fn set_ignored_patterns(&self, patterns: Vec<String>) {
        let state = self.modify(|config| config.ignored_patterns = patterns);
        self.persist(&state).await;
    }

    /// Change image settings; cached local devices are reopened with them
    pub async fn update_camera_settings(&self, settings: CameraSettings) -> CameraSettings {
        let state = self.modify(|config| config.camera_settings = settings);
        self.persist(&state).await;
        self.cameras.invalidate_local().await;
        info!("Updated camera settings: {:?}", settings);
        settings
    }

    fn resolve_camera(&self, camera: Option<&Value>) -> CameraRef {
        let selected = match camera {
            Some(camera) => camera.clone(),
            None => self.state().camera,
        };
        CameraRef::resolve_value(Some(&selected), &self.cameras.list_devices())
    }

    // ================================ LIFECYCLE ================================= //

    /// Start capturing; `Ok(false)` if a session is already capturing
    pub async fn start(&self, request: StartRequest) -> Result<bool, AgentError> {
        if let Some(interval) = request.interval {
            validate_interval(interval)?;
        }

        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            debug!("Timelapse already running");
            return Ok(false);
        }

        let state = self.modify(|config| {
            if let Some(camera) = request.camera.clone() {
                config.camera = camera;
            }
            if let Some(interval) = request.interval {
                config.interval = interval;
            }
            if let Some(auto_mode) = request.auto_mode {
                config.auto_mode = auto_mode;
            }
        });
        self.persist(&state).await;

        // The camera is opened by the frame loop, which retries with backoff
        let camera = self.resolve_camera(None);

        let started_at = Utc::now();
        let dir = create_session_dir(&self.timelapse_dir(), started_at).await?;
        let info = SessionInfo {
            start_time: started_at,
            camera: state.camera.clone(),
            interval: state.interval,
            auto_mode: state.auto_mode,
            platform: std::env::consts::OS.to_string(),
            activity_file: request.activity_file.clone(),
        };
        if let Err(e) = dir.file(SESSION_INFO_FILE).write_json(&info).await {
            let _ = dir.delete().await;
            return Err(e);
        }

        let session = Arc::new(ActiveSession {
            id: dir.name(),
            dir,
            camera,
            interval: Duration::from_secs_f64(state.interval),
            started_at,
            frame_count: AtomicU64::new(0),
            latest_frame: Mutex::new(None),
        });

        let (stop_tx, stop_rx) = watch::channel(false);
        let frame_loop = FrameLoop {
            session: session.clone(),
            cameras: self.cameras.clone(),
            settings: state.camera_settings,
        };
        let task = tokio::spawn(frame_loop.run(stop_rx));

        info!(
            "Started timelapse {} with camera {}, interval {}s{}",
            session.id,
            session.camera,
            state.interval,
            request
                .activity_file
                .as_ref()
                .map(|f| format!(" for {}", f))
                .unwrap_or_default()
        );
        *lifecycle = Some(ActiveCapture { session, stop_tx, task });
        Ok(true)
    }

    /// Stop capturing; `Ok(false)` if nothing was capturing
    pub async fn stop(&self) -> Result<bool, AgentError> {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(active) = lifecycle.take() else {
            debug!("Timelapse not running");
            return Ok(false);
        };

        active.stop_tx.send_replace(true);
        if let Err(e) = active.task.await {
            error!("Capture loop for {} ended abnormally: {}", active.session.id, e);
        }
        info!(
            "Stopped timelapse {} after {} frames ({}s)",
            active.session.id,
            active.session.frame_count.load(Ordering::SeqCst),
            (Utc::now() - active.session.started_at).num_seconds()
        );
        Ok(true)
    }

    pub async fn is_capturing(&self) -> bool {
        self.lifecycle.lock().await.is_some()
    }

    /// Id of the capturing session
    pub async fn active_session(&self) -> Option<String> {
        self.lifecycle.lock().await.as_ref().map(|a| a.session.id.clone())
    }

    pub async fn status(&self) -> ControllerStatus {
        let state = self.state();
        let lifecycle = self.lifecycle.lock().await;
        let session = lifecycle.as_ref().map(|a| a.session.clone());
        drop(lifecycle);

        ControllerStatus {
            is_capturing: session.is_some(),
            current_session: session.as_ref().map(|s| s.id.clone()),
            frame_count: session.as_ref().map(|s| s.frame_count.load(Ordering::SeqCst)),
            latest_frame: session
                .as_ref()
                .and_then(|s| s.latest_frame.lock().unwrap_or_else(|e| e.into_inner()).clone()),
            interval: state.interval,
            auto_mode: state.auto_mode,
            selected_camera: state.camera,
            camera_settings: state.camera_settings,
            available_cameras: self.cameras.list_devices(),
        }
    }

    // ================================= CAMERAS ================================== //

    /// Open a camera ahead of use so the first capture is fast
    pub async fn pre_initialize_camera(&self, camera: Option<&Value>) -> Result<CameraRef, AgentError> {
        let camera = self.resolve_camera(camera);
        let settings = self.state().camera_settings;
        let handle = self.cameras.acquire(&camera, &settings).await?;
        info!(
            "Pre-initialized camera {}{}",
            camera,
            handle.resolution().map(|r| format!(" at {}", r)).unwrap_or_default()
        );
        Ok(camera)
    }

    /// Capture one preview frame as a `data:` URI
    pub async fn test_capture(&self, camera: Option<&Value>) -> Result<String, AgentError> {
        let camera = self.resolve_camera(camera);
        let settings = self.state().camera_settings;
        let handle = self.cameras.acquire(&camera, &settings).await?;
        let frame = handle.read_frame().await?;
        Ok(frame.to_data_uri())
    }

    // ================================= SESSIONS ================================= //

    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        session::list_sessions(&self.timelapse_dir()).await
    }

    pub async fn session_frames(&self, session_id: &str) -> Result<Vec<FrameEntry>, AgentError> {
        session::session_frames(&self.timelapse_dir(), session_id).await
    }

    /// Path of a file inside a session, for serving frames
    pub async fn session_file(&self, session_id: &str, name: &str) -> Result<PathBuf, AgentError> {
        validate_session_id(session_id)?;
        validate_file_name(name)?;
        let file = self.timelapse_dir().subdir(session_id).file(name);
        if !file.exists().await {
            return Err(AgentError::NotFound(format!("{} not found in {}", name, session_id)));
        }
        Ok(file.path().to_path_buf())
    }

    /// Path of a session's finished video
    pub async fn session_video(&self, session_id: &str) -> Result<PathBuf, AgentError> {
        validate_session_id(session_id)?;
        let path = video_path(&self.timelapse_dir().subdir(session_id));
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(AgentError::NotFound(format!("no video for {}", session_id)));
        }
        Ok(path)
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), AgentError> {
        validate_session_id(session_id)?;
        if self.active_session().await.as_deref() == Some(session_id) {
            return Err(AgentError::Conflict(format!("session {} is capturing", session_id)));
        }
        if self.encoder.is_running(session_id) {
            return Err(AgentError::Conflict(format!("video for {} is being created", session_id)));
        }

        let dir = self.timelapse_dir().subdir(session_id);
        if !dir.exists().await {
            return Err(AgentError::NotFound(format!("session {} not found", session_id)));
        }
        dir.delete().await?;
        info!("Deleted session {}", session_id);
        Ok(())
    }

    // ================================== VIDEO =================================== //

    /// Start assembling a session's frames into a video.
    ///
    /// Without an id the newest session is used. The capturing session is
    /// rejected.
    pub async fn create_video(&self, session_id: Option<&str>, fps: Option<u32>) -> Result<VideoJob, AgentError> {
        let session_id = match session_id {
            Some(id) => id.to_string(),
            None => self
                .list_sessions()
                .await
                .into_iter()
                .next()
                .map(|s| s.id)
                .ok_or_else(|| AgentError::NotFound("no sessions".to_string()))?,
        };
        validate_session_id(&session_id)?;

        if self.active_session().await.as_deref() == Some(session_id.as_str()) {
            return Err(AgentError::Conflict(format!(
                "session {} is still capturing, stop it first",
                session_id
            )));
        }

        let dir = self.timelapse_dir().subdir(&session_id);
        self.encoder
            .create_video(&dir, fps.unwrap_or(self.options.default_fps))
            .await
    }

    pub fn cancel_video(&self, session_id: &str) -> Result<bool, AgentError> {
        validate_session_id(session_id)?;
        Ok(self.encoder.cancel(session_id))
    }

    pub async fn video_progress(&self, session_id: &str) -> Result<Option<ProgressRecord>, AgentError> {
        validate_session_id(session_id)?;
        let file = self.timelapse_dir().subdir(session_id).file(PROGRESS_FILE);
        read_progress(&file).await
    }

    /// Stop capture, cancel encodes and release cameras
    pub async fn cleanup(&self) {
        if let Err(e) = self.stop().await {
            error!("Failed to stop capture during cleanup: {}", e);
        }
        let cancelled = self.encoder.cancel_all();
        if cancelled > 0 {
            info!("Cancelled {} running video jobs", cancelled);
        }
        self.cameras.release_all().await;
    }
}

fn validate_interval(interval: f64) -> Result<(), AgentError> {
    if !interval.is_finite() || interval <= 0.0 {
        return Err(AgentError::ValidationError(format!(
            "interval must be a positive number of seconds, got {}",
            interval
        )));
    }
    Ok(())
}

#[async_trait]
impl ActivityListener for CaptureController {
    async fn activity_started(&self, file: Option<String>) {
        if !self.auto_mode() {
            debug!("Auto mode off, ignoring activity start");
            return;
        }
        let request = StartRequest {
            activity_file: file,
            ..Default::default()
        };
        match self.start(request).await {
            Ok(true) => info!("Auto-started timelapse due to activity start"),
            Ok(false) => {}
            Err(e) => error!("Failed to auto-start timelapse: {}", e),
        }
    }

    async fn activity_stopped(&self) {
        if !self.auto_mode() {
            debug!("Auto mode off, ignoring activity stop");
            return;
        }
        match self.stop().await {
            Ok(true) => info!("Auto-stopped timelapse due to activity stop"),
            Ok(false) => {}
            Err(e) => error!("Failed to auto-stop timelapse: {}", e),
        }
    }
}

// ================================ FRAME LOOP ================================= //

struct FrameLoop {
    session: Arc<ActiveSession>,
    cameras: Arc<CameraManager>,
    settings: CameraSettings,
}

impl FrameLoop {
    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        let interval = self.session.interval;
        let backoff = MIN_ERROR_BACKOFF.max(interval / 2);
        let mut last_capture: Option<Instant> = None;
        let mut seq: u64 = 0;

        loop {
            let due = last_capture.map(|t| t + interval).unwrap_or_else(Instant::now);
            if wait_until(due, &mut stop_rx).await {
                break;
            }

            let started = Instant::now();
            match self.capture(seq + 1, false).await {
                Ok(name) => {
                    seq += 1;
                    last_capture = Some(started);
                    debug!("Captured frame {} to {}", seq, name);
                }
                Err(e) => {
                    warn!("Error capturing frame for {}: {}", self.session.id, e);
                    if sleep_or_stop(backoff, &mut stop_rx).await {
                        break;
                    }
                }
            }
        }

        match self.capture(seq + 1, true).await {
            Ok(name) => info!("Captured final frame {}", name),
            Err(e) => warn!("Failed to capture final frame for {}: {}", self.session.id, e),
        }
    }

    /// Capture one frame into the session; full-quality frames get software adjustment
    async fn capture(&self, seq: u64, full_quality: bool) -> Result<String, AgentError> {
        let handle = self.cameras.acquire(&self.session.camera, &self.settings).await?;
        let mut frame = handle.read_frame().await?;
        drop(handle);

        if full_quality && self.settings.needs_adjustment() {
            let settings = self.settings;
            frame = tokio::task::spawn_blocking(move || frame.adjusted(&settings))
                .await
                .map_err(|e| AgentError::Internal(format!("frame adjustment panicked: {}", e)))??;
        }

        let name = frame_file_name(seq, frame.captured_at, full_quality);
        self.session.dir.file(&name).write_bytes(&frame.jpeg).await?;

        self.session.frame_count.fetch_add(1, Ordering::SeqCst);
        *self.session.latest_frame.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(format!("{}/{}", self.session.id, name));
        Ok(name)
    }
}

/// Sleep in short slices until `due`; returns `true` if stop was requested
async fn wait_until(due: Instant, stop_rx: &mut watch::Receiver<bool>) -> bool {
    loop {
        if *stop_rx.borrow() {
            return true;
        }
        let now = Instant::now();
        if now >= due {
            return false;
        }
        if sleep_or_stop(WAIT_SLICE.min(due - now), stop_rx).await {
            return true;
        }
    }
}

async fn sleep_or_stop(duration: Duration, stop_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => *stop_rx.borrow(),
        changed = stop_rx.changed() => changed.is_err() || *stop_rx.borrow(),
    }
}
