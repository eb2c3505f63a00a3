//! Camera cache eviction worker

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, info};

use crate::camera::manager::CameraManager;

/// Cache sweep worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Sweep interval
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

/// Run the cache sweep worker
pub async fn run<S, F>(
    options: &Options,
    cameras: &CameraManager,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Camera cache sweep worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Camera cache sweep worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        let released = cameras.evict_idle().await;
        if released > 0 {
            debug!("Released {} idle cameras", released);
        }
    }
}
