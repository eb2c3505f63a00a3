//! Video job progress persisted as `video_progress.json`

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::error;

use crate::errors::AgentError;
use crate::filesys::file::File;

/// Ceiling reported while the encoder is still running
pub const MAX_RUNNING_PROGRESS: f64 = 95.0;

/// Video job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    Starting,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl VideoStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoStatus::Completed | VideoStatus::Failed | VideoStatus::Cancelled)
    }
}

/// Contents of `video_progress.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub status: VideoStatus,
    pub progress: f64,
    #[serde(default)]
    pub total_frames: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<u64>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_path: Option<String>,
}

impl ProgressRecord {
    fn new(status: VideoStatus, progress: f64, total_frames: usize, start_time: DateTime<Utc>) -> Self {
        Self {
            status,
            progress,
            total_frames,
            frame: None,
            start_time,
            end_time: None,
            elapsed_seconds: None,
            error: None,
            video_path: None,
        }
    }
}

/// Extract the frame counter from an ffmpeg output line
pub fn parse_frame(line: &str) -> Option<u64> {
    static FRAME_RE: OnceLock<Regex> = OnceLock::new();
    let re = FRAME_RE.get_or_init(|| Regex::new(r"frame=\s*(\d+)").expect("frame regex"));
    re.captures(line)?.get(1)?.as_str().parse().ok()
}

/// Percentage for a frame counter, capped until the job completes
pub fn running_progress(frame: u64, total_frames: usize) -> f64 {
    if total_frames == 0 {
        return 0.0;
    }
    (frame as f64 / total_frames as f64 * 100.0).min(MAX_RUNNING_PROGRESS)
}

struct WriterState {
    progress: f64,
    last: Option<ProgressRecord>,
}

/// Serialized writer for one job's progress file.
///
/// Progress never decreases while processing and nothing is written after a
/// terminal record.
pub struct ProgressWriter {
    file: File,
    total_frames: usize,
    start_time: DateTime<Utc>,
    state: Mutex<WriterState>,
}

impl ProgressWriter {
    /// Start a job, replacing any record left by a previous job
    pub async fn begin(file: File, total_frames: usize) -> Result<Self, AgentError> {
        let start_time = Utc::now();
        let record = ProgressRecord::new(VideoStatus::Starting, 0.0, total_frames, start_time);
        file.write_json(&record).await?;
        Ok(Self {
            file,
            total_frames,
            start_time,
            state: Mutex::new(WriterState {
                progress: 0.0,
                last: Some(record),
            }),
        })
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    /// Record a frame counter reported by the encoder
    pub async fn processing(&self, frame: u64) {
        let mut state = self.state.lock().await;
        if state.last.as_ref().map(|r| r.status.is_terminal()).unwrap_or(false) {
            return;
        }

        let progress = running_progress(frame, self.total_frames).max(state.progress);
        let mut record = ProgressRecord::new(VideoStatus::Processing, progress, self.total_frames, self.start_time);
        record.frame = Some(frame);

        if self.write(&mut record).await {
            state.progress = progress;
            state.last = Some(record);
        }
    }

    /// Write a terminal record; returns `false` if the job already ended
    pub async fn finish(&self, status: VideoStatus, error: Option<String>, video_path: Option<String>) -> bool {
        let mut state = self.state.lock().await;
        if state.last.as_ref().map(|r| r.status.is_terminal()).unwrap_or(false) {
            return false;
        }

        let progress = match status {
            VideoStatus::Completed => 100.0,
            _ => state.progress,
        };
        let now = Utc::now();
        let mut record = ProgressRecord::new(status, progress, self.total_frames, self.start_time);
        record.end_time = Some(now);
        record.elapsed_seconds = Some((now - self.start_time).num_milliseconds() as f64 / 1000.0);
        record.error = error;
        record.video_path = video_path;

        self.write(&mut record).await;
        state.progress = progress;
        state.last = Some(record);
        true
    }

    /// Last record written by this writer
    pub async fn current(&self) -> Option<ProgressRecord> {
        self.state.lock().await.last.clone()
    }

    // Keeps the start time already on disk so readers see one job start
    async fn write(&self, record: &mut ProgressRecord) -> bool {
        if let Ok(Some(existing)) = self.file.read_json_opt::<ProgressRecord>().await {
            record.start_time = existing.start_time;
        }
        match self.file.write_json(record).await {
            Ok(()) => true,
            Err(e) => {
                error!("Error writing progress data to {}: {}", self.file.path().display(), e);
                false
            }
        }
    }
}

/// Read a session's progress file
pub async fn read_progress(file: &File) -> Result<Option<ProgressRecord>, AgentError> {
    file.read_json_opt().await
}
