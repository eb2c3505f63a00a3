//! ffmpeg job supervision

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::capture::session::list_frames;
use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::video::progress::{parse_frame, ProgressWriter, VideoStatus};

pub const FRAMES_LIST_FILE: &str = "frames_list.txt";
pub const PROGRESS_FILE: &str = "video_progress.json";

/// Encoder options
#[derive(Debug, Clone)]
pub struct EncoderOptions {
    pub ffmpeg_bin: String,

    /// Ceiling on one encode
    pub timeout: Duration,

    /// How long a cancelled encoder may take to exit before it is killed
    pub cancel_grace: Duration,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".to_string(),
            timeout: Duration::from_secs(600),
            cancel_grace: Duration::from_secs(5),
        }
    }
}

/// How an encode ended without error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoOutcome {
    Completed(PathBuf),
    Cancelled,
}

/// A started encode
#[derive(Debug)]
pub struct VideoJob {
    pub session_id: String,
    pub output: PathBuf,
    pub total_frames: usize,
    pub handle: JoinHandle<Result<VideoOutcome, AgentError>>,
}

struct JobEntry {
    cancel_tx: watch::Sender<bool>,
}

type Registry = Arc<Mutex<HashMap<String, JobEntry>>>;

/// Output path of a session's video
pub fn video_path(session_dir: &Dir) -> PathBuf {
    session_dir.path().join(format!("timelapse_{}.mp4", session_dir.name()))
}

/// Runs one ffmpeg process per session
pub struct VideoEncoder {
    options: EncoderOptions,
    jobs: Registry,
}

impl VideoEncoder {
    pub fn new(options: EncoderOptions) -> Self {
        Self {
            options,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn options(&self) -> &EncoderOptions {
        &self.options
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).contains_key(session_id)
    }

    pub fn active_jobs(&self) -> Vec<String> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Start encoding a session directory in the background
    pub async fn create_video(&self, session_dir: &Dir, fps: u32) -> Result<VideoJob, AgentError> {
        let session_id = session_dir.name();
        if fps == 0 {
            return Err(AgentError::ValidationError("fps must be positive".to_string()));
        }
        if !session_dir.exists().await {
            return Err(AgentError::NotFound(format!("session {} not found", session_id)));
        }

        let frames = list_frames(session_dir).await?;
        if frames.is_empty() {
            return Err(AgentError::ValidationError(format!("no frames found in {}", session_id)));
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        {
            let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
            if jobs.contains_key(&session_id) {
                return Err(AgentError::Conflict(format!(
                    "video for {} is already being created",
                    session_id
                )));
            }
            jobs.insert(session_id.clone(), JobEntry { cancel_tx });
        }

        let list_file = session_dir.file(FRAMES_LIST_FILE);
        let mut guard = JobGuard {
            jobs: self.jobs.clone(),
            session_id: session_id.clone(),
            list_file: list_file.path().to_path_buf(),
            readers: Vec::new(),
        };

        write_frames_list(&list_file, &frames).await?;
        let writer = Arc::new(ProgressWriter::begin(session_dir.file(PROGRESS_FILE), frames.len()).await?);
        let output = video_path(session_dir);

        let mut child = match self.spawn(list_file.path(), fps, &output) {
            Ok(child) => child,
            Err(e) => {
                writer.finish(VideoStatus::Failed, Some(e.to_string()), None).await;
                return Err(e);
            }
        };
        info!(
            "Creating video for {} from {} frames at {} fps",
            session_id,
            frames.len(),
            fps
        );

        let last_line = Arc::new(Mutex::new(None));
        if let Some(stdout) = child.stdout.take() {
            guard.readers.push(tokio::spawn(drain(stdout, writer.clone(), last_line.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            guard.readers.push(tokio::spawn(drain(stderr, writer.clone(), last_line.clone())));
        }

        let supervisor = Supervisor {
            options: self.options.clone(),
            session_id: session_id.clone(),
            output: output.clone(),
            writer,
            last_line,
        };
        let handle = tokio::spawn(supervisor.run(child, cancel_rx, guard));

        Ok(VideoJob {
            session_id,
            output,
            total_frames: frames.len(),
            handle,
        })
    }

    /// Request cancellation; `false` if no encode is running for the session
    pub fn cancel(&self, session_id: &str) -> bool {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        match jobs.get(session_id) {
            Some(entry) => {
                info!("Cancelling video creation for {}", session_id);
                entry.cancel_tx.send_replace(true);
                true
            }
            None => false,
        }
    }

    /// Cancel every running encode
    pub fn cancel_all(&self) -> usize {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        for entry in jobs.values() {
            entry.cancel_tx.send_replace(true);
        }
        jobs.len()
    }

    fn spawn(&self, list_file: &Path, fps: u32, output: &Path) -> Result<Child, AgentError> {
        Command::new(&self.options.ffmpeg_bin)
            .args(["-f", "concat", "-safe", "0", "-i"])
            .arg(list_file)
            .args(["-r", &fps.to_string()])
            .args(["-c:v", "libx264", "-pix_fmt", "yuv420p", "-progress", "pipe:1", "-y"])
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::EncodingError(format!("failed to start {}: {}", self.options.ffmpeg_bin, e)))
    }
}

async fn write_frames_list(list_file: &File, frames: &[PathBuf]) -> Result<(), AgentError> {
    let mut contents = String::new();
    for frame in frames {
        let absolute = tokio::fs::canonicalize(frame).await?;
        let escaped = absolute.to_string_lossy().replace('\'', r"'\''");
        contents.push_str(&format!("file '{}'\n", escaped));
    }
    list_file.write_bytes(contents.as_bytes()).await
}

/// Read encoder output, forwarding frame counters to the progress writer
async fn drain<R>(reader: R, writer: Arc<ProgressWriter>, last_line: Arc<Mutex<Option<String>>>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Encoder output closed: {}", e);
                break;
            }
        }

        let text = String::from_utf8_lossy(&buf);
        for line in text.split('\r').map(str::trim).filter(|l| !l.is_empty()) {
            match parse_frame(line) {
                Some(frame) => writer.processing(frame).await,
                None => *last_line.lock().unwrap_or_else(|e| e.into_inner()) = Some(line.to_string()),
            }
        }
    }
}

/// Releases everything an encode holds, exactly once, on every exit path
struct JobGuard {
    jobs: Registry,
    session_id: String,
    list_file: PathBuf,
    readers: Vec<JoinHandle<()>>,
}

impl JobGuard {
    fn is_cancelled(&self) -> bool {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&self.session_id)
            .map(|entry| *entry.cancel_tx.borrow())
            .unwrap_or(false)
    }

    /// Let the readers flush what the encoder wrote before it exited
    async fn drain_readers(&mut self, limit: Duration) {
        for reader in self.readers.iter_mut() {
            if tokio::time::timeout(limit, reader).await.is_err() {
                debug!("Encoder output reader for {} still busy", self.session_id);
            }
        }
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
        if let Err(e) = std::fs::remove_file(&self.list_file) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", self.list_file.display(), e);
            }
        }
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.session_id);
        debug!("Released video job for {}", self.session_id);
    }
}

enum Exit {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

struct Supervisor {
    options: EncoderOptions,
    session_id: String,
    output: PathBuf,
    writer: Arc<ProgressWriter>,
    last_line: Arc<Mutex<Option<String>>>,
}

impl Supervisor {
    async fn run(
        self,
        mut child: Child,
        mut cancel_rx: watch::Receiver<bool>,
        mut guard: JobGuard,
    ) -> Result<VideoOutcome, AgentError> {
        let exit = tokio::select! {
            status = child.wait() => Exit::Exited(status),
            _ = tokio::time::sleep(self.options.timeout) => Exit::TimedOut,
            _ = cancel_rx.wait_for(|cancelled| *cancelled) => Exit::Cancelled,
        };

        match exit {
            Exit::TimedOut => {
                error!(
                    "Video creation for {} timed out after {:?}",
                    self.session_id, self.options.timeout
                );
                kill(&mut child).await;
                let message = format!("ffmpeg timed out after {} seconds", self.options.timeout.as_secs());
                self.writer.finish(VideoStatus::Failed, Some(message.clone()), None).await;
                Err(AgentError::EncodingError(message))
            }
            Exit::Cancelled => {
                self.terminate(&mut child).await;
                self.writer.finish(VideoStatus::Cancelled, None, None).await;
                info!("Video creation for {} cancelled", self.session_id);
                Ok(VideoOutcome::Cancelled)
            }
            Exit::Exited(status) => {
                guard.drain_readers(Duration::from_secs(1)).await;
                // A cancel racing a clean exit does not discard the finished video
                let succeeded = matches!(&status, Ok(status) if status.success());
                if !succeeded && guard.is_cancelled() {
                    self.writer.finish(VideoStatus::Cancelled, None, None).await;
                    return Ok(VideoOutcome::Cancelled);
                }
                self.finish_exited(status).await
            }
        }
    }

    async fn finish_exited(
        &self,
        status: std::io::Result<std::process::ExitStatus>,
    ) -> Result<VideoOutcome, AgentError> {
        let failure = match status {
            Err(e) => Some(format!("failed to wait for ffmpeg: {}", e)),
            Ok(status) if !status.success() => {
                let detail = self
                    .last_line
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone()
                    .unwrap_or_default();
                Some(format!("ffmpeg exited with {}: {}", status, detail).trim_end_matches(": ").to_string())
            }
            Ok(_) => match tokio::fs::metadata(&self.output).await {
                Ok(meta) if meta.len() > 0 => None,
                _ => Some(format!("ffmpeg produced no output at {}", self.output.display())),
            },
        };

        match failure {
            Some(message) => {
                error!("Video creation for {} failed: {}", self.session_id, message);
                self.writer.finish(VideoStatus::Failed, Some(message.clone()), None).await;
                Err(AgentError::EncodingError(message))
            }
            None => {
                let path = self.output.to_string_lossy().into_owned();
                self.writer.finish(VideoStatus::Completed, None, Some(path)).await;
                info!("Created timelapse video: {}", self.output.display());
                Ok(VideoOutcome::Completed(self.output.clone()))
            }
        }
    }

    /// Ask ffmpeg to quit, then kill it after the grace period
    async fn terminate(&self, child: &mut Child) {
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(b"q").await {
                debug!("Failed to send quit to ffmpeg for {}: {}", self.session_id, e);
            }
            drop(stdin);
        }

        match tokio::time::timeout(self.options.cancel_grace, child.wait()).await {
            Ok(_) => debug!("ffmpeg for {} exited after quit request", self.session_id),
            Err(_) => {
                warn!(
                    "ffmpeg for {} did not exit within {:?}, killing",
                    self.session_id, self.options.cancel_grace
                );
                kill(child).await;
            }
        }
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!("Failed to kill ffmpeg: {}", e);
    }
}
