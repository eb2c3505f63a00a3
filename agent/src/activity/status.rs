//! Normalized activity status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key names used to read a status payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusKeys {
    /// Property carrying the running flag
    #[serde(default = "default_running_key")]
    pub running_key: String,

    /// Property carrying the current file name
    #[serde(default = "default_file_key")]
    pub file_key: String,

    /// Optional wrapper key the payload is nested under
    #[serde(default)]
    pub nested_key: Option<String>,
}

fn default_running_key() -> String {
    "is_running".to_string()
}

fn default_file_key() -> String {
    "current_file".to_string()
}

impl Default for StatusKeys {
    fn default() -> Self {
        Self {
            running_key: default_running_key(),
            file_key: default_file_key(),
            nested_key: None,
        }
    }
}

/// One observation of the external activity source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityStatus {
    pub is_running: bool,
    pub current_file: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl ActivityStatus {
    pub fn new(is_running: bool, current_file: Option<String>) -> Self {
        Self {
            is_running,
            current_file: current_file.filter(|f| !f.is_empty()),
            received_at: Utc::now(),
        }
    }

    pub fn running(file: impl Into<String>) -> Self {
        Self::new(true, Some(file.into()))
    }

    pub fn stopped() -> Self {
        Self::new(false, None)
    }

    /// Build a status from a JSON payload.
    ///
    /// Missing or mistyped keys are not an error: the running flag defaults to
    /// `false` and the file to `None`. When `nested_key` is set and present, the
    /// lookup happens inside that object; otherwise the top level is used.
    pub fn from_json(payload: &Value, keys: &StatusKeys) -> Self {
        let body = keys
            .nested_key
            .as_deref()
            .and_then(|key| payload.get(key))
            .filter(|inner| inner.is_object())
            .unwrap_or(payload);

        let is_running = body
            .get(&keys.running_key)
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let current_file = body
            .get(&keys.file_key)
            .and_then(Value::as_str)
            .map(str::to_string);

        Self::new(is_running, current_file)
    }
}
