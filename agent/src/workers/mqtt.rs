//! MQTT worker for published activity signals

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::activity::status::ActivityStatus;
use crate::mqtt::assembler::PubSubAssembler;
use crate::mqtt::client::{MqttAddress, MqttClient, MqttEvent};
use crate::mqtt::topics::ActivityTopics;

/// MQTT worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// MQTT broker address
    pub broker_address: MqttAddress,

    pub topics: ActivityTopics,

    /// Payload on the running topic meaning "running"
    pub running_token: String,

    /// Reconnect delay on failure
    pub reconnect_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            broker_address: MqttAddress::default(),
            topics: ActivityTopics::new("activity/running", "activity/file"),
            running_token: "true".to_string(),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// Run the MQTT worker
pub async fn run<S, F>(
    options: &Options,
    status_tx: &mpsc::Sender<ActivityStatus>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("MQTT worker starting...");

    let client_id = format!("timelapser-{}", uuid::Uuid::new_v4().simple());
    let mut assembler = PubSubAssembler::new(options.running_token.clone());

    loop {
        info!(
            "Connecting to MQTT broker: {}:{}",
            options.broker_address.host, options.broker_address.port
        );
        let mut client = match MqttClient::new(&options.broker_address, &client_id) {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to create MQTT client: {}", e);
                return;
            }
        };

        // Main event loop
        loop {
            let event = tokio::select! {
                _ = &mut shutdown_signal => {
                    info!("MQTT worker shutting down...");
                    let _ = client.disconnect().await;
                    return;
                }
                event = client.poll() => event,
            };

            match event {
                Ok(MqttEvent::Connected) => {
                    if let Err(e) = client.subscribe(&options.topics.all()).await {
                        error!("Failed to subscribe to activity topics: {}", e);
                        break;
                    }
                }
                Ok(MqttEvent::Message(msg)) => {
                    let Some(kind) = options.topics.classify(&msg.topic) else {
                        debug!("Ignoring message on unexpected topic {}", msg.topic);
                        continue;
                    };
                    if let Some(status) = assembler.on_message(kind, &msg.text()) {
                        if status_tx.send(status).await.is_err() {
                            info!("Status receiver closed, MQTT worker exiting");
                            return;
                        }
                    }
                }
                Ok(MqttEvent::Other) => {}
                Err(e) => {
                    warn!("MQTT connection lost: {}, reconnecting...", e);
                    break;
                }
            }
        }

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("MQTT worker shutting down...");
                return;
            }
            _ = sleep_fn(options.reconnect_delay) => {}
        }
    }
}
