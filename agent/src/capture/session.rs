//! Capture session layout on disk

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, warn};

use crate::errors::AgentError;
use crate::filesys::dir::Dir;

pub const SESSION_PREFIX: &str = "timelapse_";
pub const SESSION_INFO_FILE: &str = "session_info.json";
const FRAME_PREFIX: &str = "frame_";
const MAX_ID_SUFFIX: u32 = 100;

/// Contents of `session_info.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub start_time: DateTime<Utc>,
    pub camera: Value,
    pub interval: f64,
    pub auto_mode: bool,
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_file: Option<String>,
}

/// One session as listed to clients
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub path: String,
    pub info: Value,
    pub frame_count: usize,
    pub has_video: bool,
    pub thumbnail: Option<String>,
}

/// One frame as listed to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameEntry {
    /// Path relative to the timelapse directory
    pub path: String,
    pub filename: String,
}

/// Reject ids that could escape the timelapse directory
pub fn validate_session_id(session_id: &str) -> Result<(), AgentError> {
    let valid = !session_id.is_empty()
        && session_id.starts_with(SESSION_PREFIX)
        && !session_id.contains("..")
        && !session_id.contains('/')
        && !session_id.contains('\\');
    if !valid {
        return Err(AgentError::ValidationError(format!("Invalid session ID: {}", session_id)));
    }
    Ok(())
}

/// Reject file names that are not a plain entry of a session directory
pub fn validate_file_name(name: &str) -> Result<(), AgentError> {
    let valid = !name.is_empty()
        && name != "."
        && !name.contains("..")
        && !name.contains('/')
        && !name.contains('\\');
    if !valid {
        return Err(AgentError::ValidationError(format!("Invalid file name: {}", name)));
    }
    Ok(())
}

/// Session id for a start time
pub fn session_id_for(start: DateTime<Utc>) -> String {
    format!("{}{}", SESSION_PREFIX, start.format("%Y%m%d_%H%M%S"))
}

/// Frame file name; names sort in capture order
pub fn frame_file_name(seq: u64, at: DateTime<Utc>, is_final: bool) -> String {
    let suffix = if is_final { "_final" } else { "" };
    format!("{}{:06}_{}{}.jpg", FRAME_PREFIX, seq, at.format("%Y%m%d_%H%M%S"), suffix)
}

/// Frame files of a session, sorted by name
pub async fn list_frames(session_dir: &Dir) -> Result<Vec<PathBuf>, AgentError> {
    let files = session_dir.list_files_with_ext("jpg").await?;
    Ok(files
        .into_iter()
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().starts_with(FRAME_PREFIX))
                .unwrap_or(false)
        })
        .collect())
}

/// Create a fresh session directory, suffixing the id on collision
pub async fn create_session_dir(root: &Dir, start: DateTime<Utc>) -> Result<Dir, AgentError> {
    let base = session_id_for(start);
    if root.subdir(&base).create_new().await? {
        return Ok(root.subdir(&base));
    }
    for n in 1..MAX_ID_SUFFIX {
        let id = format!("{}_{}", base, n);
        let dir = root.subdir(&id);
        if dir.create_new().await? {
            warn!("Session {} already exists, using {}", base, id);
            return Ok(dir);
        }
    }
    Err(AgentError::Conflict(format!("too many sessions named {}", base)))
}

/// All sessions under the root, newest first
pub async fn list_sessions(root: &Dir) -> Vec<SessionSummary> {
    let dirs = match root.list_dirs().await {
        Ok(dirs) => dirs,
        Err(e) => {
            error!("Error listing sessions: {}", e);
            return Vec::new();
        }
    };

    let mut sessions = Vec::new();
    for path in dirs {
        let dir = Dir::new(path);
        let id = dir.name();
        if !id.starts_with(SESSION_PREFIX) {
            continue;
        }
        match summarize(&dir).await {
            Ok(summary) => sessions.push(summary),
            Err(e) => warn!("Skipping session {}: {}", id, e),
        }
    }

    sessions.sort_by(|a, b| b.id.cmp(&a.id));
    sessions
}

async fn summarize(dir: &Dir) -> Result<SessionSummary, AgentError> {
    let id = dir.name();
    let info = dir
        .file(SESSION_INFO_FILE)
        .read_json_opt::<Value>()
        .await
        .unwrap_or(None)
        .unwrap_or_else(|| Value::Object(Default::default()));
    let frames = list_frames(dir).await?;
    let thumbnail = frames
        .first()
        .and_then(|p| p.file_name())
        .map(|n| format!("{}/{}", id, n.to_string_lossy()));
    let has_video = tokio::fs::metadata(crate::video::encoder::video_path(dir)).await.is_ok();

    Ok(SessionSummary {
        path: dir.path().to_string_lossy().into_owned(),
        info,
        frame_count: frames.len(),
        has_video,
        thumbnail,
        id,
    })
}

/// Frames of one session in capture order
pub async fn session_frames(root: &Dir, session_id: &str) -> Result<Vec<FrameEntry>, AgentError> {
    validate_session_id(session_id)?;
    let dir = root.subdir(session_id);
    if !dir.exists().await {
        return Ok(Vec::new());
    }
    let frames = list_frames(&dir).await?;
    Ok(frames
        .iter()
        .filter_map(|p| p.file_name())
        .map(|name| {
            let filename = name.to_string_lossy().into_owned();
            FrameEntry {
                path: format!("{}/{}", session_id, filename),
                filename,
            }
        })
        .collect())
}
