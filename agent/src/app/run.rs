//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use reqwest::Client;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::activity::status::ActivityStatus;
use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::AgentError;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::storage::settings::ActivitySourceKind;
use crate::workers::{cache_sweep, monitor, mqtt, poller, stream};

const STATUS_CHANNEL_CAPACITY: usize = 32;

/// Run the timelapse agent
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AgentError> {
    info!("Initializing timelapse agent...");

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start agent: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, AgentError> {
    let app_state = Arc::new(AppState::init(options).await?);
    shutdown_manager.with_app_state(app_state.clone())?;

    let (status_tx, status_rx) = mpsc::channel(STATUS_CHANNEL_CAPACITY);

    init_monitor_worker(app_state.clone(), status_rx, shutdown_manager, shutdown_tx.subscribe())?;
    init_transport_worker(options, status_tx, shutdown_manager, shutdown_tx.subscribe())?;
    init_cache_sweep_worker(
        options.cache_sweep.clone(),
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    if options.enable_socket_server {
        init_socket_server(options, app_state.clone(), shutdown_manager, shutdown_tx.subscribe()).await?;
    }

    Ok(app_state)
}

fn init_monitor_worker(
    app_state: Arc<AppState>,
    mut status_rx: mpsc::Receiver<ActivityStatus>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    info!("Initializing activity monitor worker...");

    let monitor_handle = tokio::spawn(async move {
        monitor::run(
            app_state.monitor.as_ref(),
            &mut status_rx,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_monitor_worker_handle(monitor_handle)
}

fn init_transport_worker(
    options: &AppOptions,
    status_tx: mpsc::Sender<ActivityStatus>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    let shutdown_signal = Box::pin(async move {
        let _ = shutdown_rx.recv().await;
    });

    let transport_handle = match options.activity_source {
        ActivitySourceKind::Poll => {
            info!("Initializing poller worker...");
            let poller_options = options.poller.clone();
            tokio::spawn(async move {
                let client = Client::new();
                poller::run(
                    &poller_options,
                    &client,
                    &status_tx,
                    tokio::time::sleep,
                    shutdown_signal,
                )
                .await;
            })
        }
        ActivitySourceKind::Stream => {
            info!("Initializing stream worker...");
            let stream_options = options.stream.clone();
            tokio::spawn(async move {
                stream::run(&stream_options, &status_tx, tokio::time::sleep, shutdown_signal).await;
            })
        }
        ActivitySourceKind::Mqtt => {
            info!("Initializing MQTT worker...");
            let mqtt_options = options.mqtt_worker.clone();
            tokio::spawn(async move {
                mqtt::run(&mqtt_options, &status_tx, tokio::time::sleep, shutdown_signal).await;
            })
        }
    };

    shutdown_manager.with_transport_worker_handle(transport_handle)
}

fn init_cache_sweep_worker(
    options: cache_sweep::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    info!("Initializing camera cache sweep worker...");

    let cameras = app_state.cameras.clone();
    let sweep_handle = tokio::spawn(async move {
        cache_sweep::run(
            &options,
            cameras.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_cache_sweep_worker_handle(sweep_handle)
}

async fn init_socket_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    info!("Initializing local HTTP server...");

    let server_state = ServerState::new(app_state);

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_socket_server_handle(server_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    socket_server_handle: Option<JoinHandle<Result<(), AgentError>>>,
    transport_worker_handle: Option<JoinHandle<()>>,
    monitor_worker_handle: Option<JoinHandle<()>>,
    cache_sweep_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            socket_server_handle: None,
            transport_worker_handle: None,
            monitor_worker_handle: None,
            cache_sweep_worker_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), AgentError> {
        if self.app_state.is_some() {
            return Err(AgentError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_transport_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), AgentError> {
        if self.transport_worker_handle.is_some() {
            return Err(AgentError::ShutdownError("transport_handle already set".to_string()));
        }
        self.transport_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_monitor_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), AgentError> {
        if self.monitor_worker_handle.is_some() {
            return Err(AgentError::ShutdownError("monitor_handle already set".to_string()));
        }
        self.monitor_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_cache_sweep_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), AgentError> {
        if self.cache_sweep_worker_handle.is_some() {
            return Err(AgentError::ShutdownError("cache_sweep_handle already set".to_string()));
        }
        self.cache_sweep_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_socket_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), AgentError>>,
    ) -> Result<(), AgentError> {
        if self.socket_server_handle.is_some() {
            return Err(AgentError::ShutdownError("server_handle already set".to_string()));
        }
        self.socket_server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), AgentError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), AgentError> {
        info!("Shutting down timelapse agent...");

        // 1. Transport worker, so no new status arrives
        if let Some(handle) = self.transport_worker_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))?;
        }

        // 2. Activity monitor worker
        if let Some(handle) = self.monitor_worker_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))?;
        }

        // 3. Socket server
        if let Some(handle) = self.socket_server_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))??;
        }

        // 4. Cache sweep worker
        if let Some(handle) = self.cache_sweep_worker_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))?;
        }

        // 5. App state: stops capture, cancels encodes, releases cameras
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
