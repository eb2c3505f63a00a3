//! Network camera source against a local snapshot server

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

use timelapser::camera::network::NetworkSource;
use timelapser::camera::resolution::Resolution;

use crate::support::{jpeg, spawn_server};

async fn snapshot(State(hits): State<Arc<AtomicUsize>>) -> impl IntoResponse {
    hits.fetch_add(1, Ordering::SeqCst);
    ([(header::CONTENT_TYPE, "image/jpeg")], jpeg(32, 24))
}

#[tokio::test]
async fn test_reads_within_window_share_one_request() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new().route("/shot.jpg", get(snapshot)).with_state(hits.clone());
    let addr = spawn_server(app).await;

    let source = NetworkSource::new(
        &format!("http://{}/shot.jpg", addr),
        reqwest::Client::new(),
        Duration::from_secs(5),
        Duration::from_millis(50),
    );

    let (first, second) = tokio::join!(source.fetch(), source.fetch());
    assert_eq!(first.unwrap().resolution, Resolution::new(32, 24));
    assert_eq!(second.unwrap().resolution, Resolution::new(32, 24));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    source.fetch().await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_error_status_is_a_camera_error() {
    let app = Router::new().route("/shot.jpg", get(|| async { axum::http::StatusCode::NOT_FOUND }));
    let addr = spawn_server(app).await;

    let source = NetworkSource::new(
        &format!("http://{}/shot.jpg", addr),
        reqwest::Client::new(),
        Duration::from_secs(5),
        Duration::from_millis(50),
    );
    assert!(source.fetch().await.is_err());
    assert!(source.last_frame_at().await.is_none());
}
