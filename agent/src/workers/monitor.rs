//! Activity monitor worker: feeds transport updates to the state machine

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tracing::info;

use crate::activity::monitor::ActivityMonitor;
use crate::activity::status::ActivityStatus;

/// Run the activity monitor worker until shutdown or until every transport is gone
pub async fn run(
    monitor: &ActivityMonitor,
    status_rx: &mut mpsc::Receiver<ActivityStatus>,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Activity monitor worker starting...");

    loop {
        let status = tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Activity monitor worker shutting down...");
                return;
            }
            status = status_rx.recv() => status,
        };

        match status {
            Some(status) => {
                monitor.handle(&status).await;
            }
            None => {
                info!("All status transports closed, activity monitor worker exiting");
                return;
            }
        }
    }
}
