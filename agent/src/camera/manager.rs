//! Camera handle cache

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::camera::device::{CaptureDevice, DeviceBackend};
use crate::camera::frame::Frame;
use crate::camera::network::NetworkSource;
use crate::camera::reference::CameraRef;
use crate::camera::resolution::{negotiation_candidates, Resolution};
use crate::camera::settings::CameraSettings;
use crate::errors::AgentError;

/// Camera cache options
#[derive(Debug, Clone)]
pub struct CameraOptions {
    /// Release handles unused for this long
    pub idle_timeout: Duration,

    /// Period of the eviction sweep
    pub sweep_interval: Duration,

    /// Timeout of a network frame fetch
    pub network_timeout: Duration,

    /// Window during which a fetched network frame is shared
    pub coalesce_window: Duration,
}

impl Default for CameraOptions {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
            network_timeout: Duration::from_secs(5),
            coalesce_window: Duration::from_millis(50),
        }
    }
}

/// Local device handle
pub struct LocalHandle {
    pub index: u32,
    pub resolution: Resolution,
    pub settings: CameraSettings,
    device: Mutex<Box<dyn CaptureDevice>>,
}

/// Network source handle
pub struct NetworkHandle {
    source: NetworkSource,
}

impl NetworkHandle {
    pub fn url(&self) -> &str {
        self.source.url()
    }

    pub fn timeout(&self) -> Duration {
        self.source.timeout()
    }

    pub async fn last_frame_at(&self) -> Option<Instant> {
        self.source.last_frame_at().await
    }
}

/// Cached capture handle
pub enum CameraHandle {
    Local(LocalHandle),
    Network(NetworkHandle),
}

impl CameraHandle {
    /// Read one frame through this handle
    pub async fn read_frame(&self) -> Result<Frame, AgentError> {
        match self {
            CameraHandle::Local(local) => local.device.lock().await.read_frame().await,
            CameraHandle::Network(network) => network.source.fetch().await,
        }
    }

    /// Negotiated resolution, known only for local devices
    pub fn resolution(&self) -> Option<Resolution> {
        match self {
            CameraHandle::Local(local) => Some(local.resolution),
            CameraHandle::Network(_) => None,
        }
    }

    async fn is_valid(&self) -> bool {
        match self {
            // A device busy in a read is still open
            CameraHandle::Local(local) => match local.device.try_lock() {
                Ok(device) => device.is_open(),
                Err(_) => true,
            },
            CameraHandle::Network(_) => true,
        }
    }

    async fn release(&self) {
        match self {
            CameraHandle::Local(local) => local.device.lock().await.release().await,
            CameraHandle::Network(network) => network.source.clear().await,
        }
    }
}

struct CacheEntry {
    handle: Arc<CameraHandle>,
    last_used: Instant,
}

/// Camera resource manager
pub struct CameraManager {
    backend: Arc<dyn DeviceBackend>,
    http_client: Client,
    options: CameraOptions,
    entries: Mutex<HashMap<CameraRef, CacheEntry>>,
}

impl CameraManager {
    pub fn new(backend: Arc<dyn DeviceBackend>, options: CameraOptions) -> Self {
        Self {
            backend,
            http_client: Client::new(),
            options,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &CameraOptions {
        &self.options
    }

    /// Names of local devices reported by the backend
    pub fn list_devices(&self) -> Vec<String> {
        self.backend.list_devices()
    }

    /// Get a cached handle or open a new one.
    ///
    /// Opening happens under the cache lock so a `CameraRef` never maps to
    /// more than one live handle.
    pub async fn acquire(
        &self,
        camera: &CameraRef,
        settings: &CameraSettings,
    ) -> Result<Arc<CameraHandle>, AgentError> {
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.get_mut(camera) {
            entry.last_used = Instant::now();
            if entry.handle.is_valid().await {
                return Ok(entry.handle.clone());
            }
            debug!("Cached camera {} is no longer valid, recreating", camera);
            if let Some(stale) = entries.remove(camera) {
                stale.handle.release().await;
            }
        }

        let handle = Arc::new(self.open(camera, settings).await?);
        entries.insert(
            camera.clone(),
            CacheEntry {
                handle: handle.clone(),
                last_used: Instant::now(),
            },
        );
        Ok(handle)
    }

    async fn open(&self, camera: &CameraRef, settings: &CameraSettings) -> Result<CameraHandle, AgentError> {
        match camera {
            CameraRef::Network(url) => {
                info!("Configuring network camera {}", url);
                Ok(CameraHandle::Network(NetworkHandle {
                    source: NetworkSource::new(
                        url,
                        self.http_client.clone(),
                        self.options.network_timeout,
                        self.options.coalesce_window,
                    ),
                }))
            }
            CameraRef::Local(index) => {
                debug!("Creating new camera for index {}", index);
                let mut device = self.backend.open(*index).await?;
                if !device.is_open() {
                    return Err(AgentError::CameraUnavailable(format!("Failed to open camera {}", index)));
                }

                let resolution = negotiate_resolution(device.as_mut(), settings.resolution).await;

                let mode = settings.exposure_mode();
                if let Err(e) = device.apply_exposure(mode).await {
                    warn!("Failed to apply exposure {:?} on camera {}: {}", mode, index, e);
                }

                Ok(CameraHandle::Local(LocalHandle {
                    index: *index,
                    resolution,
                    settings: *settings,
                    device: Mutex::new(device),
                }))
            }
        }
    }

    /// Release handles idle past the timeout and not held by any reader
    pub async fn evict_idle(&self) -> usize {
        let mut entries = self.entries.lock().await;

        let expired: Vec<CameraRef> = entries
            .iter()
            .filter(|(_, e)| e.last_used.elapsed() > self.options.idle_timeout)
            .filter(|(_, e)| Arc::strong_count(&e.handle) == 1)
            .map(|(camera, _)| camera.clone())
            .collect();

        for camera in &expired {
            if let Some(entry) = entries.remove(camera) {
                debug!("Releasing cached camera {} due to inactivity", camera);
                entry.handle.release().await;
            }
        }

        expired.len()
    }

    /// Release local handles so the next acquire renegotiates with new settings
    pub async fn invalidate_local(&self) {
        let mut entries = self.entries.lock().await;
        let local: Vec<CameraRef> = entries.keys().filter(|c| !c.is_network()).cloned().collect();
        for camera in local {
            if let Some(entry) = entries.remove(&camera) {
                entry.handle.release().await;
            }
        }
    }

    /// Release every handle
    pub async fn release_all(&self) {
        let mut entries = self.entries.lock().await;
        for (camera, entry) in entries.drain() {
            debug!("Releasing camera {}", camera);
            entry.handle.release().await;
        }
    }

    pub async fn cached(&self) -> Vec<CameraRef> {
        self.entries.lock().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Find a working resolution.
///
/// Each candidate is set and verified with one frame read; the dimensions the
/// device actually produced are kept. If no candidate yields a frame the
/// device default is used.
pub async fn negotiate_resolution(device: &mut dyn CaptureDevice, requested: Resolution) -> Resolution {
    for candidate in negotiation_candidates(requested) {
        debug!("Trying to set camera resolution to {}", candidate);
        if let Err(e) = device.set_resolution(Some(candidate)).await {
            warn!("Failed to set resolution {}: {}", candidate, e);
            continue;
        }
        match device.read_frame().await {
            Ok(frame) => {
                if frame.resolution != candidate {
                    info!(
                        "Camera reported different resolution than requested. Using {} instead of {}",
                        frame.resolution, candidate
                    );
                } else {
                    info!("Camera resolution set to {}", frame.resolution);
                }
                return frame.resolution;
            }
            Err(e) => warn!("Failed to read a frame at {}: {}", candidate, e),
        }
    }

    error!("All resolution settings failed, using camera defaults");
    if let Err(e) = device.set_resolution(None).await {
        warn!("Failed to restore default resolution: {}", e);
    }
    device.reported_resolution()
}
