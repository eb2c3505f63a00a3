//! Local capture devices

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::camera::frame::Frame;
use crate::camera::resolution::Resolution;
use crate::camera::settings::ExposureMode;
use crate::errors::AgentError;

/// Resolution assumed when a device never reported one
pub const DEVICE_DEFAULT_RESOLUTION: Resolution = Resolution::new(640, 480);

/// An open local capture device
#[async_trait]
pub trait CaptureDevice: Send {
    fn is_open(&self) -> bool;

    /// Request a capture size; `None` restores the device default
    async fn set_resolution(&mut self, resolution: Option<Resolution>) -> Result<(), AgentError>;

    async fn read_frame(&mut self) -> Result<Frame, AgentError>;

    /// Dimensions the device currently reports, falling back to its default
    fn reported_resolution(&self) -> Resolution;

    async fn apply_exposure(&mut self, mode: ExposureMode) -> Result<(), AgentError>;

    async fn release(&mut self);
}

/// Opens local capture devices by index
#[async_trait]
pub trait DeviceBackend: Send + Sync {
    async fn open(&self, index: u32) -> Result<Box<dyn CaptureDevice>, AgentError>;

    /// Names of local devices, in index order
    fn list_devices(&self) -> Vec<String>;
}

// ================================ FFMPEG BACKEND ================================= //

/// Device backend that grabs single frames through the ffmpeg CLI
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg_bin: String,
    read_timeout: Duration,
}

impl FfmpegBackend {
    pub fn new(ffmpeg_bin: impl Into<String>, read_timeout: Duration) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            read_timeout,
        }
    }
}

#[async_trait]
impl DeviceBackend for FfmpegBackend {
    async fn open(&self, index: u32) -> Result<Box<dyn CaptureDevice>, AgentError> {
        let input = device_input(index)?;

        #[cfg(target_os = "linux")]
        {
            if tokio::fs::metadata(&input).await.is_err() {
                return Err(AgentError::CameraUnavailable(format!("{} does not exist", input)));
            }
        }

        debug!("Opening camera {} via ffmpeg", input);
        Ok(Box::new(FfmpegDevice {
            index,
            input,
            ffmpeg_bin: self.ffmpeg_bin.clone(),
            read_timeout: self.read_timeout,
            requested: None,
            reported: None,
            open: true,
        }))
    }

    fn list_devices(&self) -> Vec<String> {
        list_video_devices()
    }
}

#[cfg(target_os = "linux")]
fn device_input(index: u32) -> Result<String, AgentError> {
    Ok(format!("/dev/video{}", index))
}

#[cfg(target_os = "macos")]
fn device_input(index: u32) -> Result<String, AgentError> {
    Ok(index.to_string())
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn device_input(index: u32) -> Result<String, AgentError> {
    Err(AgentError::CameraUnavailable(format!(
        "local camera {} is not supported on this platform",
        index
    )))
}

#[cfg(target_os = "linux")]
const INPUT_FORMAT: &str = "v4l2";

#[cfg(not(target_os = "linux"))]
const INPUT_FORMAT: &str = "avfoundation";

/// List V4L2 device nodes
pub fn list_video_devices() -> Vec<String> {
    (0..10)
        .map(|i| format!("/dev/video{}", i))
        .filter(|path| std::path::Path::new(path).exists())
        .collect()
}

struct FfmpegDevice {
    index: u32,
    input: String,
    ffmpeg_bin: String,
    read_timeout: Duration,
    requested: Option<Resolution>,
    reported: Option<Resolution>,
    open: bool,
}

#[async_trait]
impl CaptureDevice for FfmpegDevice {
    fn is_open(&self) -> bool {
        self.open
    }

    async fn set_resolution(&mut self, resolution: Option<Resolution>) -> Result<(), AgentError> {
        self.requested = resolution;
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Frame, AgentError> {
        if !self.open {
            return Err(AgentError::CameraError(format!("camera {} is released", self.index)));
        }

        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.args(["-hide_banner", "-loglevel", "error", "-f", INPUT_FORMAT]);
        if let Some(size) = self.requested {
            cmd.args(["-video_size", &size.to_string()]);
        }
        cmd.args(["-i", &self.input])
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "mjpeg", "pipe:1"])
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.read_timeout, cmd.output())
            .await
            .map_err(|_| AgentError::CameraError(format!("frame read from {} timed out", self.input)))?
            .map_err(|e| AgentError::CameraUnavailable(format!("failed to run {}: {}", self.ffmpeg_bin, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AgentError::CameraError(format!(
                "failed to read frame from {}: {}",
                self.input,
                stderr.trim()
            )));
        }

        let frame = Frame::from_jpeg(output.stdout)?;
        self.reported = Some(frame.resolution);
        Ok(frame)
    }

    fn reported_resolution(&self) -> Resolution {
        self.reported.unwrap_or(DEVICE_DEFAULT_RESOLUTION)
    }

    async fn apply_exposure(&mut self, mode: ExposureMode) -> Result<(), AgentError> {
        if !cfg!(target_os = "linux") {
            return Ok(());
        }

        // V4L2 exposure_time_absolute is in 100us units
        let controls = match mode {
            ExposureMode::Auto => "auto_exposure=3".to_string(),
            ExposureMode::Manual { exposure, .. } => format!(
                "auto_exposure=1,exposure_time_absolute={}",
                ((exposure * 5000.0) as i64).clamp(1, 5000)
            ),
        };

        let status = Command::new("v4l2-ctl")
            .args(["-d", &self.input, &format!("--set-ctrl={}", controls)])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(s) if s.success() => debug!("Applied exposure controls on {}: {}", self.input, controls),
            Ok(s) => warn!("v4l2-ctl exited with {} on {}", s, self.input),
            Err(e) => warn!("Unable to run v4l2-ctl for {}: {}", self.input, e),
        }
        Ok(())
    }

    async fn release(&mut self) {
        debug!("Releasing camera {}", self.input);
        self.open = false;
    }
}
