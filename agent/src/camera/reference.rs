//! Camera identifier normalization

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Tagged camera identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum CameraRef {
    Local(u32),
    Network(String),
}

impl fmt::Display for CameraRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraRef::Local(index) => write!(f, "local:{}", index),
            CameraRef::Network(url) => write!(f, "{}", url),
        }
    }
}

impl CameraRef {
    pub fn is_network(&self) -> bool {
        matches!(self, CameraRef::Network(_))
    }

    /// Resolve a loosely typed identifier.
    ///
    /// Accepted shapes, in order: http(s) URL, digit string, `index:name`,
    /// `/dev/videoN`, exact name in `available`, case-insensitive partial
    /// name in `available`. Anything else resolves to the first local camera.
    pub fn resolve(input: Option<&str>, available: &[String]) -> CameraRef {
        let Some(raw) = input.map(str::trim).filter(|s| !s.is_empty()) else {
            return CameraRef::Local(0);
        };

        let lower = raw.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return CameraRef::Network(raw.to_string());
        }

        if let Ok(index) = raw.parse::<u32>() {
            return CameraRef::Local(index);
        }

        if let Some((prefix, _name)) = raw.split_once(':') {
            if let Ok(index) = prefix.parse::<u32>() {
                return CameraRef::Local(index);
            }
        }

        if let Some(suffix) = raw.strip_prefix("/dev/video") {
            if let Ok(index) = suffix.parse::<u32>() {
                return CameraRef::Local(index);
            }
        }

        if let Some(pos) = available.iter().position(|name| name == raw) {
            return CameraRef::Local(pos as u32);
        }

        if let Some(pos) = available
            .iter()
            .position(|name| name.to_ascii_lowercase().contains(&lower))
        {
            return CameraRef::Local(pos as u32);
        }

        warn!("Could not determine camera index for '{}', using default (0)", raw);
        CameraRef::Local(0)
    }

    /// Resolve a JSON value (integer or string)
    pub fn resolve_value(value: Option<&Value>, available: &[String]) -> CameraRef {
        match value {
            Some(Value::Number(n)) => match n.as_u64().map(u32::try_from) {
                Some(Ok(index)) => CameraRef::Local(index),
                _ => {
                    warn!("Camera index {} is out of range, using default (0)", n);
                    CameraRef::Local(0)
                }
            },
            Some(Value::String(s)) => CameraRef::resolve(Some(s), available),
            _ => CameraRef::resolve(None, available),
        }
    }
}
