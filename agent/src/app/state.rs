//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::activity::ignore::IgnoreRuleSet;
use crate::activity::monitor::ActivityMonitor;
use crate::app::options::AppOptions;
use crate::camera::device::{DeviceBackend, FfmpegBackend};
use crate::camera::manager::CameraManager;
use crate::capture::controller::{CaptureController, ControllerOptions};
use crate::errors::AgentError;
use crate::storage::state::ControllerState;
use crate::video::encoder::VideoEncoder;

/// Main application state
pub struct AppState {
    /// Cached camera handles
    pub cameras: Arc<CameraManager>,

    /// Video jobs
    pub encoder: Arc<VideoEncoder>,

    /// Capture lifecycle
    pub controller: Arc<CaptureController>,

    /// Activity state machine
    pub monitor: Arc<ActivityMonitor>,
}

impl AppState {
    /// Initialize application state with the ffmpeg device backend
    pub async fn init(options: &AppOptions) -> Result<Self, AgentError> {
        let backend = Arc::new(FfmpegBackend::new(
            options.capture_ffmpeg_bin.clone(),
            options.camera.network_timeout,
        ));
        Self::init_with_backend(options, backend).await
    }

    /// Initialize application state on an arbitrary device backend
    pub async fn init_with_backend(
        options: &AppOptions,
        backend: Arc<dyn DeviceBackend>,
    ) -> Result<Self, AgentError> {
        info!("Initializing application state...");

        options.storage.setup().await?;
        let persisted = ControllerState::load(&options.storage.state_file()).await;
        let patterns = persisted.ignored_patterns.clone();

        let cameras = Arc::new(CameraManager::new(backend, options.camera.clone()));
        let encoder = Arc::new(VideoEncoder::new(options.encoder.clone()));
        let controller = Arc::new(CaptureController::new(
            ControllerOptions {
                layout: options.storage.clone(),
                default_fps: options.default_fps,
            },
            cameras.clone(),
            encoder.clone(),
            persisted,
        ));
        let monitor = Arc::new(ActivityMonitor::new(controller.clone(), IgnoreRuleSet::new(&patterns)));

        Ok(Self {
            cameras,
            encoder,
            controller,
            monitor,
        })
    }

    /// Replace the ignore patterns in the monitor and the persisted state
    pub async fn set_ignored_patterns(&self, patterns: Vec<String>) {
        self.monitor.set_ignored_patterns(&patterns);
        self.controller.set_ignored_patterns(patterns).await;
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), AgentError> {
        info!("Shutting down application state...");
        self.controller.cleanup().await;
        Ok(())
    }
}
