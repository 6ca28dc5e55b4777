//! Bridge service orchestrator.
//!
//! Wires the MQTT client, the sync engine and their channels together
//! without exposing MQTT internals to main.rs. The engine runs as a single
//! task draining one input channel; commands from the [`BridgeHandle`] join
//! the same sequence as bus messages, so all state transitions stay in
//! arrival order.

use crate::config::Config;
use crate::engine::{
    DeviceSyncEngine, EngineCommand, EngineInput, FirmwareUpdateReply, ModelEvent,
};
use crate::error::{BridgeError, Result};
use crate::mqtt::{MqttClient, MqttMessage};
use log::{info, warn};
use rumqttc::QoS;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Cloneable command surface for an embedding platform.
#[derive(Clone)]
pub struct BridgeHandle {
    input_tx: mpsc::Sender<EngineInput>,
}

impl BridgeHandle {
    pub async fn update_firmware(&self, device_id: &str) -> Result<FirmwareUpdateReply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineCommand::UpdateFirmware {
            device_id: device_id.to_string(),
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| BridgeError::EngineUnavailable)
    }

    /// Always yields a renderable graph; fresh snapshots arrive later as
    /// [`ModelEvent::NetworkMapReady`].
    pub async fn network_map(&self) -> Result<String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineCommand::RequestNetworkMap { reply: reply_tx })
            .await?;
        reply_rx.await.map_err(|_| BridgeError::EngineUnavailable)
    }

    pub async fn set_property(&self, device_id: &str, property: &str, value: Value) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineCommand::SetProperty {
            device_id: device_id.to_string(),
            property: property.to_string(),
            value,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| BridgeError::EngineUnavailable)?
    }

    pub async fn invoke_action(&self, device_id: &str, action: &str, input: Value) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineCommand::InvokeAction {
            device_id: device_id.to_string(),
            action: action.to_string(),
            input,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| BridgeError::EngineUnavailable)?
    }

    pub async fn remove_device(&self, device_id: &str, force: bool) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineCommand::RemoveDevice {
            device_id: device_id.to_string(),
            force,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| BridgeError::EngineUnavailable)?
    }

    async fn send(&self, command: EngineCommand) -> Result<()> {
        self.input_tx
            .send(EngineInput::Command(command))
            .await
            .map_err(|_| BridgeError::EngineUnavailable)
    }
}

/// The bridge service: owns the configuration and starts everything.
pub struct BridgeService {
    config: Config,
}

impl BridgeService {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Start the bridge. Returns the command handle, the model-event stream
    /// for the platform collaborator, and the service task handle.
    pub fn start(self) -> (BridgeHandle, mpsc::Receiver<ModelEvent>, JoinHandle<()>) {
        let (input_tx, input_rx) = mpsc::channel::<EngineInput>(256);
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);

        let engine = DeviceSyncEngine::new(
            self.config.engine.clone(),
            outbound_tx,
            event_tx,
            input_tx.clone(),
        );

        let handle = BridgeHandle {
            input_tx: input_tx.clone(),
        };
        let task = tokio::spawn(run(self.config, engine, input_tx, input_rx, outbound_rx));
        (handle, event_rx, task)
    }
}

async fn run(
    config: Config,
    engine: DeviceSyncEngine,
    input_tx: mpsc::Sender<EngineInput>,
    input_rx: mpsc::Receiver<EngineInput>,
    mut outbound_rx: mpsc::Receiver<crate::mqtt::OutboundMessage>,
) {
    info!(
        "[Bridge] Connecting to {}:{}",
        config.mqtt.broker_host, config.mqtt.broker_port
    );

    let mqtt_client = MqttClient::new(&config.mqtt);
    let publish_client = mqtt_client.client();

    let (msg_tx, mut msg_rx) = mpsc::channel::<MqttMessage>(100);
    let (connected_tx, connected_rx) = oneshot::channel();

    // Start the MQTT event loop first so it can establish the connection.
    let mqtt_loop = tokio::spawn(async move {
        mqtt_client.run(msg_tx, Some(connected_tx)).await;
    });

    match tokio::time::timeout(Duration::from_secs(10), connected_rx).await {
        Ok(Ok(())) => {
            info!("[Bridge] Connection established, subscribing to topics");
        }
        Ok(Err(_)) => {
            warn!("[Bridge] Connection signal channel dropped");
            return;
        }
        Err(_) => {
            warn!("[Bridge] Connection timeout after 10 seconds");
            mqtt_loop.abort();
            return;
        }
    }

    // One wildcard subscription covers the fleet, the bridge topics and
    // every availability channel.
    let wildcard = format!("{}/#", config.engine.topic_prefix);
    if let Err(e) = publish_client
        .subscribe(&wildcard, QoS::AtMostOnce)
        .await
    {
        warn!("[Bridge] Failed to subscribe to {}: {:?}", wildcard, e);
    }

    // Drain fire-and-forget outbound requests onto the wire.
    let outbound_client = publish_client.clone();
    let outbound_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if let Err(e) = outbound_client
                .publish(&msg.topic, QoS::AtMostOnce, false, msg.payload.as_bytes())
                .await
            {
                warn!("[Bridge] Failed to publish to {}: {:?}", msg.topic, e);
            }
        }
    });

    // Feed bus messages into the engine's single input sequence.
    let forward_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            if input_tx.send(EngineInput::Bus(msg)).await.is_err() {
                break;
            }
        }
    });

    info!("[Bridge] Started");
    engine.run(input_rx).await;

    mqtt_loop.abort();
    outbound_task.abort();
    forward_task.abort();
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Handle plumbing without a broker: an engine draining the same
    /// channel answers handle commands.
    #[tokio::test]
    async fn test_handle_round_trip_through_engine() {
        let config = Config::default();
        let (input_tx, input_rx) = mpsc::channel::<EngineInput>(16);
        let (outbound_tx, _outbound_rx) = mpsc::channel(16);
        let (event_tx, _event_rx) = mpsc::channel(16);
        let engine = DeviceSyncEngine::new(
            config.engine.clone(),
            outbound_tx,
            event_tx,
            input_tx.clone(),
        );
        let engine_task = tokio::spawn(engine.run(input_rx));

        let handle = BridgeHandle { input_tx };
        let reply = handle.update_firmware("z2m-missing").await.unwrap();
        assert_eq!(reply, FirmwareUpdateReply::UnknownDevice);

        let graph = handle.network_map().await.unwrap();
        assert!(graph.starts_with("digraph"));

        assert!(matches!(
            handle.set_property("z2m-missing", "state", Value::Bool(true)).await,
            Err(BridgeError::UnknownDevice(_))
        ));

        engine_task.abort();
    }
}
