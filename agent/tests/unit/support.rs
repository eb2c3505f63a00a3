//! Shared fakes for the integration tests

use std::io::Cursor;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tokio::net::TcpListener;

use timelapser::camera::device::{CaptureDevice, DeviceBackend};
use timelapser::camera::frame::Frame;
use timelapser::camera::manager::{CameraManager, CameraOptions};
use timelapser::camera::resolution::Resolution;
use timelapser::camera::settings::ExposureMode;
use timelapser::capture::controller::{CaptureController, ControllerOptions};
use timelapser::errors::AgentError;
use timelapser::storage::layout::StorageLayout;
use timelapser::storage::state::ControllerState;
use timelapser::video::encoder::{EncoderOptions, VideoEncoder};

/// Serializes tests that write executables and spawn processes
pub static PROCESS_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([90, 140, 200]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
        .unwrap();
    bytes
}

pub struct StaticDevice {
    open: bool,
    first_read_delay: Option<Duration>,
}

#[async_trait]
impl CaptureDevice for StaticDevice {
    fn is_open(&self) -> bool {
        self.open
    }

    async fn set_resolution(&mut self, _resolution: Option<Resolution>) -> Result<(), AgentError> {
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Frame, AgentError> {
        if !self.open {
            return Err(AgentError::CameraError("released".to_string()));
        }
        if let Some(delay) = self.first_read_delay.take() {
            tokio::time::sleep(delay).await;
        }
        Frame::from_jpeg(jpeg(32, 24))
    }

    fn reported_resolution(&self) -> Resolution {
        Resolution::new(32, 24)
    }

    async fn apply_exposure(&mut self, _mode: ExposureMode) -> Result<(), AgentError> {
        Ok(())
    }

    async fn release(&mut self) {
        self.open = false;
    }
}

/// One working local camera at index 0
#[derive(Default)]
pub struct StaticBackend {
    pub opens: AtomicUsize,
    failing_opens: AtomicUsize,
    first_read_delay: Option<Duration>,
}

impl StaticBackend {
    /// The first `count` opens report the camera as unavailable
    pub fn failing_opens(count: usize) -> Self {
        Self {
            failing_opens: AtomicUsize::new(count),
            ..Default::default()
        }
    }

    /// The first frame read from each opened device takes `delay`
    pub fn slow_first_read(delay: Duration) -> Self {
        Self {
            first_read_delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceBackend for StaticBackend {
    async fn open(&self, index: u32) -> Result<Box<dyn CaptureDevice>, AgentError> {
        if index != 0 {
            return Err(AgentError::CameraUnavailable(format!("no camera at index {}", index)));
        }
        let failing = self
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AgentError::CameraUnavailable("camera busy".to_string()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StaticDevice {
            open: true,
            first_read_delay: self.first_read_delay,
        }))
    }

    fn list_devices(&self) -> Vec<String> {
        vec!["/dev/video0".to_string()]
    }
}

pub fn encoder_options(ffmpeg_bin: &Path) -> EncoderOptions {
    EncoderOptions {
        ffmpeg_bin: ffmpeg_bin.to_string_lossy().into_owned(),
        timeout: Duration::from_secs(10),
        cancel_grace: Duration::from_millis(200),
    }
}

pub struct Fixture {
    pub controller: Arc<CaptureController>,
    pub backend: Arc<StaticBackend>,
    pub encoder: Arc<VideoEncoder>,
    pub layout: StorageLayout,
}

pub fn fixture(root: &Path, encoder: EncoderOptions) -> Fixture {
    fixture_with_backend(root, encoder, StaticBackend::default())
}

pub fn fixture_with_backend(root: &Path, encoder: EncoderOptions, backend: StaticBackend) -> Fixture {
    let layout = StorageLayout::new(root.join("base"), root.join("timelapses"));
    let backend = Arc::new(backend);
    let cameras = Arc::new(CameraManager::new(backend.clone(), CameraOptions::default()));
    let encoder = Arc::new(VideoEncoder::new(encoder));
    let controller = Arc::new(CaptureController::new(
        ControllerOptions {
            layout: layout.clone(),
            default_fps: 10,
        },
        cameras,
        encoder.clone(),
        ControllerState::default(),
    ));
    Fixture {
        controller,
        backend,
        encoder,
        layout,
    }
}

/// Write an executable shell script standing in for ffmpeg
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Prints two progress lines and writes a non-empty output file
pub const FFMPEG_OK: &str = r#"for last; do :; done
echo "frame=1"
echo "frame=2"
printf video > "$last""#;

/// Never finishes on its own
pub const FFMPEG_HANG: &str = "exec sleep 30";

/// Fails without output
pub const FFMPEG_FAIL: &str = r#"echo "Invalid data found when processing input" >&2
exit 1"#;

/// Put `count` frames into a session directory
pub fn seed_session(timelapse_root: &Path, id: &str, count: usize) -> PathBuf {
    let dir = timelapse_root.join(id);
    std::fs::create_dir_all(&dir).unwrap();
    for seq in 1..=count {
        std::fs::write(dir.join(format!("frame_{:06}_20250101_120000.jpg", seq)), jpeg(16, 16)).unwrap();
    }
    dir
}

/// Serve a router on an ephemeral local port
pub async fn spawn_server(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
