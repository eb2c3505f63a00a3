//! Video encoder lifecycle against fake ffmpeg scripts
#![cfg(unix)]

use std::time::Duration;

use tempfile::TempDir;

use timelapser::errors::AgentError;
use timelapser::filesys::dir::Dir;
use timelapser::video::encoder::{VideoEncoder, VideoOutcome, FRAMES_LIST_FILE, PROGRESS_FILE};
use timelapser::video::progress::{read_progress, VideoStatus};

use crate::support::{
    encoder_options, fixture, seed_session, write_script, FFMPEG_FAIL, FFMPEG_HANG, FFMPEG_OK, PROCESS_LOCK,
};

const SESSION: &str = "timelapse_20250101_120000";

#[tokio::test]
async fn test_video_completes() {
    let _lock = PROCESS_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let tmp = TempDir::new().unwrap();
    let ffmpeg = write_script(tmp.path(), "ffmpeg", FFMPEG_OK);
    let session = Dir::new(seed_session(tmp.path(), SESSION, 3));
    let encoder = VideoEncoder::new(encoder_options(&ffmpeg));

    let job = encoder.create_video(&session, 10).await.unwrap();
    assert_eq!(job.total_frames, 3);
    assert!(encoder.is_running(SESSION));

    let outcome = job.handle.await.unwrap().unwrap();
    assert_eq!(outcome, VideoOutcome::Completed(job.output.clone()));
    assert!(job.output.ends_with(format!("timelapse_{}.mp4", SESSION)));
    assert_eq!(std::fs::read(&job.output).unwrap(), b"video");

    let record = read_progress(&session.file(PROGRESS_FILE)).await.unwrap().unwrap();
    assert_eq!(record.status, VideoStatus::Completed);
    assert_eq!(record.progress, 100.0);
    assert_eq!(record.total_frames, 3);
    assert!(record.end_time.is_some());

    assert!(!encoder.is_running(SESSION));
    assert!(!session.file(FRAMES_LIST_FILE).exists().await);
}

#[tokio::test]
async fn test_video_failure_is_recorded() {
    let _lock = PROCESS_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let tmp = TempDir::new().unwrap();
    let ffmpeg = write_script(tmp.path(), "ffmpeg", FFMPEG_FAIL);
    let session = Dir::new(seed_session(tmp.path(), SESSION, 2));
    let encoder = VideoEncoder::new(encoder_options(&ffmpeg));

    let job = encoder.create_video(&session, 10).await.unwrap();
    let err = job.handle.await.unwrap().unwrap_err();
    assert!(matches!(err, AgentError::EncodingError(_)));

    let record = read_progress(&session.file(PROGRESS_FILE)).await.unwrap().unwrap();
    assert_eq!(record.status, VideoStatus::Failed);
    assert!(record.error.unwrap().contains("Invalid data"));
    assert!(encoder.active_jobs().is_empty());
    assert!(!session.file(FRAMES_LIST_FILE).exists().await);
}

#[tokio::test]
async fn test_video_timeout_kills_encoder() {
    let _lock = PROCESS_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let tmp = TempDir::new().unwrap();
    let ffmpeg = write_script(tmp.path(), "ffmpeg", FFMPEG_HANG);
    let session = Dir::new(seed_session(tmp.path(), SESSION, 2));
    let mut options = encoder_options(&ffmpeg);
    options.timeout = Duration::from_millis(300);
    let encoder = VideoEncoder::new(options);

    let job = encoder.create_video(&session, 10).await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), job.handle)
        .await
        .expect("timeout was not enforced")
        .unwrap();
    assert!(matches!(result, Err(AgentError::EncodingError(ref m)) if m.contains("timed out")));

    let record = read_progress(&session.file(PROGRESS_FILE)).await.unwrap().unwrap();
    assert_eq!(record.status, VideoStatus::Failed);
    assert!(encoder.active_jobs().is_empty());
    assert!(!session.file(FRAMES_LIST_FILE).exists().await);
}

#[tokio::test]
async fn test_cancel_running_video() {
    let _lock = PROCESS_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let tmp = TempDir::new().unwrap();
    let ffmpeg = write_script(tmp.path(), "ffmpeg", FFMPEG_HANG);
    let session = Dir::new(seed_session(tmp.path(), SESSION, 2));
    let encoder = VideoEncoder::new(encoder_options(&ffmpeg));

    assert!(!encoder.cancel(SESSION));

    let job = encoder.create_video(&session, 10).await.unwrap();
    assert!(matches!(
        encoder.create_video(&session, 10).await,
        Err(AgentError::Conflict(_))
    ));

    assert!(encoder.cancel(SESSION));
    assert!(encoder.cancel(SESSION));

    let outcome = tokio::time::timeout(Duration::from_secs(5), job.handle)
        .await
        .expect("cancel did not stop the encoder")
        .unwrap()
        .unwrap();
    assert_eq!(outcome, VideoOutcome::Cancelled);

    let record = read_progress(&session.file(PROGRESS_FILE)).await.unwrap().unwrap();
    assert_eq!(record.status, VideoStatus::Cancelled);
    assert!(record.progress < 100.0);
    assert!(!encoder.cancel(SESSION));
    assert!(!session.file(FRAMES_LIST_FILE).exists().await);
}

#[tokio::test]
async fn test_video_input_validation() {
    let tmp = TempDir::new().unwrap();
    let encoder = VideoEncoder::new(encoder_options(&tmp.path().join("ffmpeg")));

    let missing = Dir::new(tmp.path().join("timelapse_20250101_000000"));
    assert!(matches!(
        encoder.create_video(&missing, 10).await,
        Err(AgentError::NotFound(_))
    ));

    let empty = Dir::new(seed_session(tmp.path(), SESSION, 0));
    assert!(matches!(
        encoder.create_video(&empty, 10).await,
        Err(AgentError::ValidationError(_))
    ));
    assert!(matches!(
        encoder.create_video(&empty, 0).await,
        Err(AgentError::ValidationError(_))
    ));
    assert!(encoder.active_jobs().is_empty());
}

#[tokio::test]
async fn test_controller_video_uses_newest_session() {
    let _lock = PROCESS_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let tmp = TempDir::new().unwrap();
    let ffmpeg = write_script(tmp.path(), "ffmpeg", FFMPEG_OK);
    let fx = fixture(tmp.path(), encoder_options(&ffmpeg));
    let root = tmp.path().join("timelapses");
    seed_session(&root, "timelapse_20250101_080000", 2);
    seed_session(&root, "timelapse_20250102_080000", 4);

    let job = fx.controller.create_video(None, Some(5)).await.unwrap();
    assert_eq!(job.session_id, "timelapse_20250102_080000");
    assert_eq!(job.total_frames, 4);
    job.handle.await.unwrap().unwrap();

    let record = fx
        .controller
        .video_progress("timelapse_20250102_080000")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, VideoStatus::Completed);
    assert!(fx
        .controller
        .video_progress("timelapse_20250101_080000")
        .await
        .unwrap()
        .is_none());

    let sessions = fx.controller.list_sessions().await;
    assert!(sessions[0].has_video);
    assert!(!sessions[1].has_video);
}

#[tokio::test]
async fn test_cancel_after_clean_exit_keeps_video() {
    let _lock = PROCESS_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let tmp = TempDir::new().unwrap();
    // The background sleep keeps the output pipes open after the script exits
    let body = format!("{}\nsleep 1 &", FFMPEG_OK);
    let ffmpeg = write_script(tmp.path(), "ffmpeg", &body);
    let session = Dir::new(seed_session(tmp.path(), SESSION, 2));
    let encoder = VideoEncoder::new(encoder_options(&ffmpeg));

    let job = encoder.create_video(&session, 10).await.unwrap();
    for _ in 0..200 {
        if job.output.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(encoder.cancel(SESSION));

    let outcome = tokio::time::timeout(Duration::from_secs(5), job.handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome, VideoOutcome::Completed(job.output.clone()));

    let record = read_progress(&session.file(PROGRESS_FILE)).await.unwrap().unwrap();
    assert_eq!(record.status, VideoStatus::Completed);
    assert!(!encoder.is_running(SESSION));
}
