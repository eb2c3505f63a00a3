//! Capture controller against a fake camera backend

use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use tokio_test::assert_ok;

use timelapser::activity::fsm::MonitorState;
use timelapser::activity::ignore::IgnoreRuleSet;
use timelapser::activity::monitor::{ActivityListener, ActivityMonitor};
use timelapser::activity::status::ActivityStatus;
use timelapser::capture::controller::{StartRequest, StateUpdate};
use timelapser::capture::session::SESSION_INFO_FILE;
use timelapser::errors::AgentError;
use timelapser::storage::state::ControllerState;

use crate::support::{encoder_options, fixture, fixture_with_backend, StaticBackend};

fn start_request(interval: f64) -> StartRequest {
    StartRequest {
        interval: Some(interval),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_start_capture_stop() {
    let tmp = TempDir::new().unwrap();
    let fx = fixture(tmp.path(), encoder_options(&tmp.path().join("ffmpeg")));

    assert!(assert_ok!(fx.controller.start(start_request(0.1)).await));
    assert!(!assert_ok!(fx.controller.start(start_request(0.1)).await));
    assert!(fx.controller.is_capturing().await);

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(assert_ok!(fx.controller.stop().await));
    assert!(!assert_ok!(fx.controller.stop().await));
    assert!(!fx.controller.is_capturing().await);

    let sessions = fx.controller.list_sessions().await;
    assert_eq!(sessions.len(), 1);
    let session = &sessions[0];
    assert!(session.id.starts_with("timelapse_"));
    assert!(session.frame_count >= 2, "only {} frames", session.frame_count);
    assert!(!session.has_video);

    let frames = fx.controller.session_frames(&session.id).await.unwrap();
    assert_eq!(frames.len(), session.frame_count);
    let last = frames.last().unwrap();
    assert!(last.filename.contains("_final"), "last frame was {}", last.filename);
    assert_eq!(last.path, format!("{}/{}", session.id, last.filename));

    let info = fx.layout.timelapse_dir().subdir(&session.id).file(SESSION_INFO_FILE);
    assert!(info.exists().await);

    // The cached handle was reused for every frame
    assert_eq!(fx.backend.opens(), 1);
}

#[tokio::test]
async fn test_camera_failure_at_activity_start_is_retried() {
    let tmp = TempDir::new().unwrap();
    let fx = fixture_with_backend(
        tmp.path(),
        encoder_options(&tmp.path().join("ffmpeg")),
        StaticBackend::failing_opens(1),
    );
    fx.controller
        .update_state(StateUpdate {
            interval: Some(0.1),
            ..Default::default()
        })
        .await
        .unwrap();
    let monitor = ActivityMonitor::new(fx.controller.clone(), IgnoreRuleSet::default());

    for _ in 0..5 {
        monitor.handle(&ActivityStatus::running("a.gcode")).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(monitor.state(), MonitorState::Capturing);
    assert!(fx.controller.is_capturing().await);
    assert_eq!(fx.controller.list_sessions().await.len(), 1);

    // The failed first capture backs off for a full second at this interval
    assert_eq!(fx.controller.status().await.frame_count, Some(0));

    tokio::time::sleep(Duration::from_millis(1350)).await;
    let frames = fx.controller.status().await.frame_count.unwrap_or(0);
    assert!(frames >= 2, "only {} frames after the camera recovered", frames);

    monitor.handle(&ActivityStatus::stopped()).await;
    assert!(!fx.controller.is_capturing().await);
    assert_eq!(fx.backend.opens(), 1);
}

#[tokio::test]
async fn test_slow_capture_does_not_burst() {
    let tmp = TempDir::new().unwrap();
    let fx = fixture_with_backend(
        tmp.path(),
        encoder_options(&tmp.path().join("ffmpeg")),
        StaticBackend::slow_first_read(Duration::from_millis(1200)),
    );

    assert!(assert_ok!(fx.controller.start(start_request(0.5)).await));

    // Frames missed during the slow capture are not made up afterwards
    tokio::time::sleep(Duration::from_millis(1450)).await;
    let frames = fx.controller.status().await.frame_count.unwrap_or(0);
    assert!((1..=2).contains(&frames), "{} frames after one slow capture", frames);

    assert!(assert_ok!(fx.controller.stop().await));
}

#[tokio::test]
async fn test_unknown_camera_keeps_session_capturing() {
    let tmp = TempDir::new().unwrap();
    let fx = fixture(tmp.path(), encoder_options(&tmp.path().join("ffmpeg")));

    let request = StartRequest {
        camera: Some(json!(3)),
        ..start_request(1.0)
    };
    assert!(assert_ok!(fx.controller.start(request).await));
    assert!(fx.controller.is_capturing().await);

    assert!(assert_ok!(fx.controller.stop().await));
    let sessions = fx.controller.list_sessions().await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].frame_count, 0);
}

#[tokio::test]
async fn test_invalid_interval_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let fx = fixture(tmp.path(), encoder_options(&tmp.path().join("ffmpeg")));

    let err = fx.controller.start(start_request(0.0)).await.unwrap_err();
    assert!(matches!(err, AgentError::ValidationError(_)));

    let update = StateUpdate {
        interval: Some(-2.0),
        ..Default::default()
    };
    assert!(matches!(
        fx.controller.update_state(update).await,
        Err(AgentError::ValidationError(_))
    ));
}

#[tokio::test]
async fn test_auto_mode_gates_activity_callbacks() {
    let tmp = TempDir::new().unwrap();
    let fx = fixture(tmp.path(), encoder_options(&tmp.path().join("ffmpeg")));

    fx.controller
        .update_state(StateUpdate {
            auto_mode: Some(false),
            ..Default::default()
        })
        .await
        .unwrap();
    fx.controller.activity_started(Some("a.txt".to_string())).await;
    assert!(!fx.controller.is_capturing().await);

    fx.controller
        .update_state(StateUpdate {
            auto_mode: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();
    fx.controller.activity_started(Some("a.txt".to_string())).await;
    assert!(fx.controller.is_capturing().await);

    fx.controller.activity_stopped().await;
    assert!(!fx.controller.is_capturing().await);
}

#[tokio::test]
async fn test_state_updates_are_persisted() {
    let tmp = TempDir::new().unwrap();
    let fx = fixture(tmp.path(), encoder_options(&tmp.path().join("ffmpeg")));

    fx.controller
        .update_state(StateUpdate {
            camera: Some(json!("http://cam.local/shot.jpg")),
            interval: Some(2.5),
            ..Default::default()
        })
        .await
        .unwrap();
    fx.controller
        .set_ignored_patterns(vec!["draft".to_string()])
        .await;

    let stored = ControllerState::load(&fx.layout.state_file()).await;
    assert_eq!(stored, fx.controller.state());
    assert_eq!(stored.interval, 2.5);
    assert_eq!(stored.camera, json!("http://cam.local/shot.jpg"));
    assert_eq!(stored.ignored_patterns, vec!["draft".to_string()]);
}

#[tokio::test]
async fn test_test_capture_returns_data_uri() {
    let tmp = TempDir::new().unwrap();
    let fx = fixture(tmp.path(), encoder_options(&tmp.path().join("ffmpeg")));

    let image = assert_ok!(fx.controller.test_capture(None).await);
    assert!(image.starts_with("data:image/jpeg;base64,"));
}

#[tokio::test]
async fn test_delete_session_rules() {
    let tmp = TempDir::new().unwrap();
    let fx = fixture(tmp.path(), encoder_options(&tmp.path().join("ffmpeg")));

    assert!(matches!(
        fx.controller.delete_session("../etc").await,
        Err(AgentError::ValidationError(_))
    ));
    assert!(matches!(
        fx.controller.delete_session("timelapse_20990101_000000").await,
        Err(AgentError::NotFound(_))
    ));

    fx.controller.start(start_request(5.0)).await.unwrap();
    let id = fx.controller.active_session().await.unwrap();
    assert!(matches!(
        fx.controller.delete_session(&id).await,
        Err(AgentError::Conflict(_))
    ));

    fx.controller.stop().await.unwrap();
    fx.controller.delete_session(&id).await.unwrap();
    assert!(fx.controller.list_sessions().await.is_empty());
}

#[tokio::test]
async fn test_video_of_capturing_session_conflicts() {
    let tmp = TempDir::new().unwrap();
    let fx = fixture(tmp.path(), encoder_options(&tmp.path().join("ffmpeg")));

    fx.controller.start(start_request(5.0)).await.unwrap();
    let id = fx.controller.active_session().await.unwrap();

    let err = fx.controller.create_video(Some(&id), None).await.unwrap_err();
    assert!(matches!(err, AgentError::Conflict(_)));

    fx.controller.cleanup().await;
    assert!(!fx.controller.is_capturing().await);
}

#[tokio::test]
async fn test_video_without_sessions_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let fx = fixture(tmp.path(), encoder_options(&tmp.path().join("ffmpeg")));

    let err = fx.controller.create_video(None, None).await.unwrap_err();
    assert!(matches!(err, AgentError::NotFound(_)));
    assert!(fx.encoder.active_jobs().is_empty());
}
