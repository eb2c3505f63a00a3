//! Activity transports against local servers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use futures::SinkExt;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;

use timelapser::activity::status::ActivityStatus;
use timelapser::mqtt::client::MqttAddress;
use timelapser::mqtt::topics::ActivityTopics;
use timelapser::workers::{mqtt, poller, stream};

use crate::support::spawn_server;

const WAIT: Duration = Duration::from_secs(5);

async fn next_status(rx: &mut mpsc::Receiver<ActivityStatus>) -> ActivityStatus {
    timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

// ================================== POLLER ====================================== //

async fn flaky_status(State(hits): State<Arc<AtomicUsize>>) -> (StatusCode, Json<Value>) {
    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
        let body = json!({"is_running": true, "current_file": "unavailable.gcode"});
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body));
    }
    (StatusCode::OK, Json(json!({"is_running": true, "current_file": "a.gcode"})))
}

#[tokio::test]
async fn test_poller_skips_error_responses() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/status", get(flaky_status))
        .with_state(hits.clone());
    let addr = spawn_server(app).await;

    let options = poller::Options {
        url: format!("http://{}/status", addr),
        interval: Duration::from_millis(20),
        ..Default::default()
    };
    let (tx, mut rx) = mpsc::channel(8);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let worker = tokio::spawn(async move {
        let client = reqwest::Client::new();
        let shutdown = Box::pin(async move {
            let _ = stop_rx.await;
        });
        poller::run(&options, &client, &tx, tokio::time::sleep, shutdown).await;
    });

    let status = next_status(&mut rx).await;
    assert!(status.is_running);
    assert_eq!(status.current_file.as_deref(), Some("a.gcode"));
    assert!(hits.load(Ordering::SeqCst) >= 2);

    drop(rx);
    let _ = stop_tx.send(());
    timeout(WAIT, worker).await.unwrap().unwrap();
}

// ================================== STREAM ====================================== //

#[tokio::test]
async fn test_stream_reconnects_after_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // Each connection pushes one status and then closes
    tokio::spawn(async move {
        for file in ["first.gcode", "second.gcode"] {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let text = json!({"is_running": true, "current_file": file}).to_string();
            ws.send(Message::Text(text.into())).await.unwrap();
            let _ = ws.close(None).await;
        }
    });

    let options = stream::Options {
        url: format!("http://{}/ws", addr),
        reconnect_delay: Duration::from_millis(50),
        ..Default::default()
    };
    let (tx, mut rx) = mpsc::channel(8);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let worker = tokio::spawn(async move {
        let shutdown = Box::pin(async move {
            let _ = stop_rx.await;
        });
        stream::run(&options, &tx, tokio::time::sleep, shutdown).await;
    });

    assert_eq!(next_status(&mut rx).await.current_file.as_deref(), Some("first.gcode"));
    assert_eq!(next_status(&mut rx).await.current_file.as_deref(), Some("second.gcode"));

    let _ = stop_tx.send(());
    timeout(WAIT, worker).await.unwrap().unwrap();
}

// =================================== MQTT ======================================= //

const RUNNING_TOPIC: &str = "printer/running";
const FILE_TOPIC: &str = "printer/file";

async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    let header = stream.read_u8().await?;
    let mut len = 0usize;
    let mut multiplier = 1usize;
    loop {
        let byte = stream.read_u8().await?;
        len += (byte & 0x7f) as usize * multiplier;
        if byte & 0x80 == 0 {
            break;
        }
        multiplier *= 128;
    }
    let mut body = vec![0; len];
    stream.read_exact(&mut body).await?;
    Ok((header, body))
}

fn subscribed_topics(body: &[u8]) -> Vec<String> {
    let mut topics = Vec::new();
    let mut pos = 2;
    while pos + 2 <= body.len() {
        let len = u16::from_be_bytes([body[pos], body[pos + 1]]) as usize;
        pos += 2;
        topics.push(String::from_utf8_lossy(&body[pos..pos + len]).into_owned());
        pos += len + 1;
    }
    topics
}

fn publish_packet(topic: &str, payload: &str) -> Vec<u8> {
    let mut packet = vec![0x30, (2 + topic.len() + payload.len()) as u8];
    packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    packet.extend_from_slice(topic.as_bytes());
    packet.extend_from_slice(payload.as_bytes());
    packet
}

/// Minimal MQTT 3.1.1 broker: drops the first client once it has subscribed
/// and publishes an activity to the second
async fn fake_broker(listener: TcpListener, subscriptions: mpsc::Sender<Vec<String>>) {
    for connection in 0..2 {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut topics = Vec::new();
        while let Ok((header, body)) = read_packet(&mut stream).await {
            match header >> 4 {
                // CONNECT
                1 => {
                    let _ = stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await;
                }
                // SUBSCRIBE
                8 => {
                    let granted = subscribed_topics(&body);
                    let mut suback = vec![0x90, (2 + granted.len()) as u8, body[0], body[1]];
                    suback.extend(std::iter::repeat(0x01).take(granted.len()));
                    let _ = stream.write_all(&suback).await;
                    topics.extend(granted);

                    if topics.len() == 2 {
                        let _ = subscriptions.send(topics.clone()).await;
                        if connection == 0 {
                            break;
                        }
                        let _ = stream.write_all(&publish_packet(RUNNING_TOPIC, "true")).await;
                        let _ = stream.write_all(&publish_packet(FILE_TOPIC, "a.gcode")).await;
                    }
                }
                // PINGREQ
                12 => {
                    let _ = stream.write_all(&[0xD0, 0x00]).await;
                }
                _ => {}
            }
        }
    }
}

#[tokio::test]
async fn test_mqtt_resubscribes_after_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (sub_tx, mut sub_rx) = mpsc::channel(4);
    tokio::spawn(fake_broker(listener, sub_tx));

    let options = mqtt::Options {
        broker_address: MqttAddress {
            host: "127.0.0.1".to_string(),
            port,
            ..Default::default()
        },
        topics: ActivityTopics::new(RUNNING_TOPIC, FILE_TOPIC),
        reconnect_delay: Duration::from_millis(50),
        ..Default::default()
    };
    let (tx, mut rx) = mpsc::channel(8);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let worker = tokio::spawn(async move {
        let shutdown = Box::pin(async move {
            let _ = stop_rx.await;
        });
        mqtt::run(&options, &tx, tokio::time::sleep, shutdown).await;
    });

    let mut expected = vec![FILE_TOPIC.to_string(), RUNNING_TOPIC.to_string()];
    expected.sort();
    for _ in 0..2 {
        let mut topics = timeout(WAIT, sub_rx.recv()).await.unwrap().unwrap();
        topics.sort();
        assert_eq!(topics, expected);
    }

    let status = next_status(&mut rx).await;
    assert!(status.is_running);
    assert_eq!(status.current_file.as_deref(), Some("a.gcode"));

    let _ = stop_tx.send(());
    timeout(WAIT, worker).await.unwrap().unwrap();
}
