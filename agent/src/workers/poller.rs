//! Polling worker for the activity status endpoint

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::activity::status::{ActivityStatus, StatusKeys};
use crate::errors::AgentError;

/// Poller worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Status endpoint
    pub url: String,

    /// Polling interval
    pub interval: Duration,

    /// Timeout of one request
    pub timeout: Duration,

    pub keys: StatusKeys,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080/status".to_string(),
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(5),
            keys: StatusKeys::default(),
        }
    }
}

/// Fetch and normalize one status
pub async fn fetch_status(client: &Client, options: &Options) -> Result<ActivityStatus, AgentError> {
    let response = client
        .get(&options.url)
        .timeout(options.timeout)
        .send()
        .await
        .map_err(|e| AgentError::TransportError(format!("GET {} failed: {}", options.url, e)))?;

    if !response.status().is_success() {
        return Err(AgentError::TransportError(format!(
            "GET {} returned HTTP {}",
            options.url,
            response.status()
        )));
    }

    let payload: Value = response
        .json()
        .await
        .map_err(|e| AgentError::TransportError(format!("invalid status payload: {}", e)))?;
    Ok(ActivityStatus::from_json(&payload, &options.keys))
}

/// Run the poller worker
pub async fn run<S, F>(
    options: &Options,
    client: &Client,
    status_tx: &mpsc::Sender<ActivityStatus>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Poller worker starting, polling {} every {:?}", options.url, options.interval);

    loop {
        match fetch_status(client, options).await {
            Ok(status) => {
                debug!("Polled status: running={} file={:?}", status.is_running, status.current_file);
                if status_tx.send(status).await.is_err() {
                    info!("Status receiver closed, poller worker exiting");
                    return;
                }
            }
            Err(e) => warn!("Failed to get status: {}", e),
        }

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Poller worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }
    }
}
