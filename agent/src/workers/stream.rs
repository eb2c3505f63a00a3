//! WebSocket subscription worker for pushed activity status

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::activity::status::{ActivityStatus, StatusKeys};
use crate::errors::AgentError;

/// Stream worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// ws:// or wss:// endpoint
    pub url: String,

    /// Delay before reconnecting after a disconnect
    pub reconnect_delay: Duration,

    pub keys: StatusKeys,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080/ws".to_string(),
            reconnect_delay: Duration::from_secs(5),
            keys: StatusKeys::default(),
        }
    }
}

/// Accept ws/wss URLs, converting http/https to their socket scheme
pub fn build_stream_url(raw: &str) -> Result<Url, AgentError> {
    let mut url = Url::parse(raw).map_err(|e| AgentError::ConfigError(format!("invalid stream URL {}: {}", raw, e)))?;

    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(AgentError::ConfigError(format!(
                "unsupported stream URL scheme: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| AgentError::ConfigError("Failed to set scheme".to_string()))?;
    Ok(url)
}

/// Parse one pushed text frame
pub fn parse_message(text: &str, keys: &StatusKeys) -> Result<ActivityStatus, AgentError> {
    let payload: Value = serde_json::from_str(text)?;
    if !payload.is_object() {
        return Err(AgentError::TransportError(format!("expected a JSON object, got {}", text)));
    }
    Ok(ActivityStatus::from_json(&payload, keys))
}

enum Disconnect {
    Shutdown,
    Lost,
}

/// Run the stream worker
pub async fn run<S, F>(
    options: &Options,
    status_tx: &mpsc::Sender<ActivityStatus>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Stream worker starting...");

    let url = match build_stream_url(&options.url) {
        Ok(url) => url,
        Err(e) => {
            error!("Failed to build stream URL: {}", e);
            return;
        }
    };

    loop {
        info!("Connecting to status stream: {}", url);

        let connection = tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Stream worker shutting down...");
                return;
            }
            connection = connect_async(url.as_str()) => connection,
        };

        match connection {
            Ok((ws_stream, _)) => {
                info!("Connected to status stream");
                match consume(ws_stream, options, status_tx, &mut shutdown_signal).await {
                    Disconnect::Shutdown => return,
                    Disconnect::Lost => warn!("Status stream disconnected"),
                }
            }
            Err(e) => {
                error!(
                    "Failed to connect to status stream: {}. Retrying in {:?}...",
                    e, options.reconnect_delay
                );
            }
        }

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Stream worker shutting down...");
                return;
            }
            _ = sleep_fn(options.reconnect_delay) => {}
        }
    }
}

async fn consume(
    mut ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    options: &Options,
    status_tx: &mpsc::Sender<ActivityStatus>,
    shutdown_signal: &mut Pin<Box<dyn Future<Output = ()> + Send>>,
) -> Disconnect {
    loop {
        tokio::select! {
            _ = &mut *shutdown_signal => {
                info!("Stream worker shutting down connection...");
                let _ = ws_stream.close(None).await;
                return Disconnect::Shutdown;
            }
            msg = ws_stream.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                    Some(Ok(Message::Close(_))) | None => return Disconnect::Lost,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        error!("Status stream error: {}", e);
                        return Disconnect::Lost;
                    }
                };

                match parse_message(&text, &options.keys) {
                    Ok(status) => {
                        debug!("Pushed status: running={} file={:?}", status.is_running, status.current_file);
                        if status_tx.send(status).await.is_err() {
                            return Disconnect::Shutdown;
                        }
                    }
                    Err(e) => warn!("Skipping malformed status message: {}", e),
                }
            }
        }
    }
}
