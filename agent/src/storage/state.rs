//! Persisted controller state

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::camera::settings::CameraSettings;
use crate::errors::AgentError;
use crate::filesys::file::File;

/// State restored across restarts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerState {
    /// Start and stop capture from activity updates
    #[serde(default = "default_auto_mode")]
    pub auto_mode: bool,

    /// Camera as given by the user (index, name, path or URL)
    #[serde(default = "default_camera")]
    pub camera: Value,

    /// Seconds between frames
    #[serde(default = "default_interval")]
    pub interval: f64,

    #[serde(default)]
    pub camera_settings: CameraSettings,

    #[serde(default)]
    pub ignored_patterns: Vec<String>,
}

fn default_auto_mode() -> bool {
    true
}

fn default_camera() -> Value {
    Value::from(0)
}

fn default_interval() -> f64 {
    5.0
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            auto_mode: default_auto_mode(),
            camera: default_camera(),
            interval: default_interval(),
            camera_settings: CameraSettings::default(),
            ignored_patterns: Vec::new(),
        }
    }
}

impl ControllerState {
    /// Load the state, falling back to defaults if the file is missing or corrupt
    pub async fn load(file: &File) -> Self {
        match file.read_json_opt::<ControllerState>().await {
            Ok(Some(state)) => state,
            Ok(None) => Self::default(),
            Err(e) => {
                warn!("Failed to read {}: {}, using defaults", file.path().display(), e);
                Self::default()
            }
        }
    }

    pub async fn save(&self, file: &File) -> Result<(), AgentError> {
        file.write_json(self).await
    }
}
