//! HTTP routes serving session files

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use tempfile::TempDir;
use tower::ServiceExt;

use timelapser::app::options::AppOptions;
use timelapser::app::state::AppState;
use timelapser::server::serve::router;
use timelapser::server::state::ServerState;
use timelapser::storage::layout::StorageLayout;

use crate::support::{jpeg, seed_session, StaticBackend};

const SESSION: &str = "timelapse_20250101_120000";
const FRAME: &str = "frame_000001_20250101_120000.jpg";

async fn app(tmp: &TempDir) -> Router {
    let options = AppOptions {
        storage: StorageLayout::new(tmp.path().join("base"), tmp.path().join("timelapses")),
        ..Default::default()
    };
    let state = AppState::init_with_backend(&options, Arc::new(StaticBackend::default()))
        .await
        .unwrap();
    router(Arc::new(ServerState::new(Arc::new(state))))
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_serve_session_frame() {
    let tmp = TempDir::new().unwrap();
    let app = app(&tmp).await;
    seed_session(&tmp.path().join("timelapses"), SESSION, 1);

    let (status, body) = get(&app, &format!("/image/{}/{}", SESSION, FRAME)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, jpeg(16, 16));

    let (status, _) = get(&app, &format!("/image/{}/frame_999999.jpg", SESSION)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_serve_frame_rejects_escaping_paths() {
    let tmp = TempDir::new().unwrap();
    let app = app(&tmp).await;
    seed_session(&tmp.path().join("timelapses"), SESSION, 1);
    std::fs::write(tmp.path().join("timelapses").join("secret.txt"), "secret").unwrap();

    let (status, _) = get(&app, &format!("/image/{}/..%2Fsecret.txt", SESSION)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(&app, &format!("/image/other_session/{}", FRAME)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_serve_session_video() {
    let tmp = TempDir::new().unwrap();
    let app = app(&tmp).await;
    let dir = seed_session(&tmp.path().join("timelapses"), SESSION, 1);

    let (status, _) = get(&app, &format!("/video/{}", SESSION)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    std::fs::write(dir.join(format!("timelapse_{}.mp4", SESSION)), b"video").unwrap();
    let (status, body) = get(&app, &format!("/video/{}", SESSION)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"video");

    let (status, _) = get(&app, "/video/..").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
