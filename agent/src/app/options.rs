//! Application configuration options

use std::time::Duration;

use crate::camera::manager::CameraOptions;
use crate::mqtt::client::MqttAddress;
use crate::mqtt::topics::ActivityTopics;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{ActivitySourceKind, Settings};
use crate::video::encoder::EncoderOptions;
use crate::workers::{cache_sweep, mqtt, poller, stream};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub storage: StorageLayout,

    /// Enable local HTTP server
    pub enable_socket_server: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Which transport feeds the activity monitor
    pub activity_source: ActivitySourceKind,

    /// Poller worker options
    pub poller: poller::Options,

    /// Stream worker options
    pub stream: stream::Options,

    /// MQTT worker options
    pub mqtt_worker: mqtt::Options,

    /// Camera cache sweep options
    pub cache_sweep: cache_sweep::Options,

    /// Camera cache options
    pub camera: CameraOptions,

    /// ffmpeg binary used to grab frames from local devices
    pub capture_ffmpeg_bin: String,

    /// Video encoder options
    pub encoder: EncoderOptions,

    /// Frame rate used when a video request names none
    pub default_fps: u32,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageLayout::default(),
            enable_socket_server: true,
            server: ServerOptions::default(),
            activity_source: ActivitySourceKind::Poll,
            poller: poller::Options::default(),
            stream: stream::Options::default(),
            mqtt_worker: mqtt::Options::default(),
            cache_sweep: cache_sweep::Options::default(),
            camera: CameraOptions::default(),
            capture_ffmpeg_bin: "ffmpeg".to_string(),
            encoder: EncoderOptions::default(),
            default_fps: 10,
        }
    }
}

impl AppOptions {
    /// Build runtime options from the settings file
    pub fn from_settings(settings: &Settings, base_dir: impl Into<std::path::PathBuf>) -> Self {
        let keys = settings.status_keys.clone();
        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageLayout::new(base_dir, settings.timelapse_dir.clone()),
            enable_socket_server: settings.server.enabled,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            activity_source: settings.activity_source,
            poller: poller::Options {
                url: settings.poll.url.clone(),
                interval: Duration::from_secs(settings.poll.interval_secs),
                timeout: Duration::from_secs(settings.poll.timeout_secs),
                keys: keys.clone(),
            },
            stream: stream::Options {
                url: settings.stream.url.clone(),
                reconnect_delay: Duration::from_secs(settings.stream.reconnect_delay_secs),
                keys,
            },
            mqtt_worker: mqtt::Options {
                broker_address: MqttAddress {
                    host: settings.mqtt.host.clone(),
                    port: settings.mqtt.port,
                    use_tls: settings.mqtt.tls,
                    ca_cert_path: settings.mqtt.ca_cert_path.clone(),
                    username: settings.mqtt.username.clone(),
                    password: settings.mqtt.password.clone(),
                },
                topics: ActivityTopics::new(settings.mqtt.running_topic.clone(), settings.mqtt.file_topic.clone()),
                running_token: settings.mqtt.running_token.clone(),
                ..Default::default()
            },
            cache_sweep: cache_sweep::Options {
                interval: Duration::from_secs(settings.camera.sweep_interval_secs),
            },
            camera: CameraOptions {
                idle_timeout: Duration::from_secs(settings.camera.cache_idle_timeout_secs),
                sweep_interval: Duration::from_secs(settings.camera.sweep_interval_secs),
                network_timeout: Duration::from_secs(settings.camera.network_timeout_secs),
                coalesce_window: Duration::from_millis(settings.camera.coalesce_window_ms),
            },
            capture_ffmpeg_bin: settings.camera.ffmpeg_bin.clone(),
            encoder: EncoderOptions {
                ffmpeg_bin: settings.video.ffmpeg_bin.clone(),
                timeout: Duration::from_secs(settings.video.timeout_secs),
                cancel_grace: Duration::from_secs(settings.video.cancel_grace_secs),
            },
            default_fps: settings.video.default_fps,
        }
    }
}

/// Lifecycle options for the agent
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5001,
        }
    }
}
