//! Settings file management

use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::activity::status::StatusKeys;
use crate::logs::LogLevel;

/// Agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub log_json: bool,

    /// Also write logs to a daily rolling file
    #[serde(default)]
    pub log_to_file: bool,

    /// Root directory of capture sessions
    #[serde(default = "default_timelapse_dir")]
    pub timelapse_dir: PathBuf,

    /// Local HTTP server
    #[serde(default)]
    pub server: ServerSettings,

    /// Which transport delivers activity status
    #[serde(default)]
    pub activity_source: ActivitySourceKind,

    /// Payload key names
    #[serde(default)]
    pub status_keys: StatusKeys,

    #[serde(default)]
    pub poll: PollSettings,

    #[serde(default)]
    pub stream: StreamSettings,

    #[serde(default)]
    pub mqtt: MqttSettings,

    #[serde(default)]
    pub camera: CameraSettingsConfig,

    #[serde(default)]
    pub video: VideoSettings,
}

fn default_true() -> bool {
    true
}

fn default_timelapse_dir() -> PathBuf {
    PathBuf::from("./timelapses")
}

fn default_ffmpeg_bin() -> String {
    "ffmpeg".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            timelapse_dir: default_timelapse_dir(),
            server: ServerSettings::default(),
            activity_source: ActivitySourceKind::default(),
            status_keys: StatusKeys::default(),
            poll: PollSettings::default(),
            stream: StreamSettings::default(),
            mqtt: MqttSettings::default(),
            camera: CameraSettingsConfig::default(),
            video: VideoSettings::default(),
        }
    }
}

impl Settings {
    /// Apply the environment variables recognised by the agent
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = lookup("TARGET_API_URL");
        let endpoint = lookup("STATUS_ENDPOINT");
        if base.is_some() || endpoint.is_some() {
            let base = base.unwrap_or_else(|| "http://localhost:8080".to_string());
            let endpoint = endpoint.unwrap_or_else(|| "/status".to_string());
            self.poll.url = format!("{}{}", base.trim_end_matches('/'), endpoint);
        }

        if let Some(key) = lookup("STATUS_PROPERTY") {
            self.status_keys.running_key = key;
        }
        if let Some(key) = lookup("CURRENT_ACTIVITY_PROPERTY") {
            self.status_keys.file_key = key;
        }
        if let Some(interval) = lookup("POLL_INTERVAL") {
            match interval.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.poll.interval_secs = secs,
                _ => warn!("Ignoring invalid POLL_INTERVAL '{}'", interval),
            }
        }
        if let Some(dir) = lookup("TIMELAPSE_DIR") {
            self.timelapse_dir = PathBuf::from(dir);
        }
        if let Some(port) = lookup("PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!("Ignoring invalid PORT '{}'", port),
            }
        }
    }
}

/// Local HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Serve the HTTP API at all
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    5001
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            enabled: true,
        }
    }
}

/// Activity status transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivitySourceKind {
    #[default]
    Poll,
    Stream,
    Mqtt,
}

/// HTTP polling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollSettings {
    #[serde(default = "default_poll_url")]
    pub url: String,

    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_poll_timeout")]
    pub timeout_secs: u64,
}

fn default_poll_url() -> String {
    "http://localhost:8080/status".to_string()
}

fn default_poll_interval() -> u64 {
    5
}

fn default_poll_timeout() -> u64 {
    5
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            url: default_poll_url(),
            interval_secs: default_poll_interval(),
            timeout_secs: default_poll_timeout(),
        }
    }
}

/// WebSocket subscription settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    #[serde(default = "default_stream_url")]
    pub url: String,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

fn default_stream_url() -> String {
    "ws://localhost:8080/ws".to_string()
}

fn default_reconnect_delay() -> u64 {
    5
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            url: default_stream_url(),
            reconnect_delay_secs: default_reconnect_delay(),
        }
    }
}

/// MQTT broker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttSettings {
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    #[serde(default)]
    pub tls: bool,

    /// Optional path to a PEM-encoded CA certificate for broker TLS verification.
    /// When absent, the system certificate store is used.
    #[serde(default)]
    pub ca_cert_path: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default, skip_serializing, deserialize_with = "deserialize_secret")]
    pub password: Option<SecretString>,

    #[serde(default = "default_running_topic")]
    pub running_topic: String,

    #[serde(default = "default_file_topic")]
    pub file_topic: String,

    /// Payload on the running topic that means "running"
    #[serde(default = "default_running_token")]
    pub running_token: String,
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_running_topic() -> String {
    "activity/running".to_string()
}

fn default_file_topic() -> String {
    "activity/file".to_string()
}

fn default_running_token() -> String {
    "true".to_string()
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            tls: false,
            ca_cert_path: None,
            username: None,
            password: None,
            running_topic: default_running_topic(),
            file_topic: default_file_topic(),
            running_token: default_running_token(),
        }
    }
}

/// Camera cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraSettingsConfig {
    #[serde(default = "default_cache_idle_timeout")]
    pub cache_idle_timeout_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_network_timeout")]
    pub network_timeout_secs: u64,

    #[serde(default = "default_coalesce_window")]
    pub coalesce_window_ms: u64,

    /// Binary used to grab frames from local devices
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: String,
}

fn default_cache_idle_timeout() -> u64 {
    30
}

fn default_sweep_interval() -> u64 {
    5
}

fn default_network_timeout() -> u64 {
    5
}

fn default_coalesce_window() -> u64 {
    50
}

impl Default for CameraSettingsConfig {
    fn default() -> Self {
        Self {
            cache_idle_timeout_secs: default_cache_idle_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            network_timeout_secs: default_network_timeout(),
            coalesce_window_ms: default_coalesce_window(),
            ffmpeg_bin: default_ffmpeg_bin(),
        }
    }
}

/// Video assembly settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSettings {
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: String,

    #[serde(default = "default_video_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_cancel_grace")]
    pub cancel_grace_secs: u64,

    #[serde(default = "default_fps")]
    pub default_fps: u32,
}

fn default_video_timeout() -> u64 {
    600
}

fn default_cancel_grace() -> u64 {
    5
}

fn default_fps() -> u32 {
    10
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            ffmpeg_bin: default_ffmpeg_bin(),
            timeout_secs: default_video_timeout(),
            cancel_grace_secs: default_cancel_grace(),
            default_fps: default_fps(),
        }
    }
}
