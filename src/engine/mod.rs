//! The live synchronization engine: routes inbound bus messages to device
//! models, applies value transforms, and drives the availability, firmware
//! and network-map lifecycles.
//!
//! Single-threaded by construction: one tokio task drains one input channel,
//! so handlers run strictly in arrival order and the device maps need no
//! locking. Outbound requests are fire-and-forget; responses come back later
//! as independent inbound messages.

mod commands;
pub mod events;
mod ingest;
pub mod lifecycle;

pub use events::{FirmwareUpdateReply, ModelEvent};

use crate::config::{EngineConfig, OfflinePolicy};
use crate::error::Result;
use crate::model::DeviceModel;
use crate::model::builder::DeviceModelBuilder;
use crate::mqtt::topics;
use crate::mqtt::{MqttMessage, OutboundMessage};
use lifecycle::FleetLifecycle;
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Tag prefixed to bridge addresses so model identifiers never collide with
/// other subsystems on the same platform.
pub const DEVICE_ID_PREFIX: &str = "z2m-";

/// Payload requesting a full state read from a device.
const GET_STATE_PAYLOAD: &str = r#"{"state":""}"#;

/// Everything the engine task processes, in arrival order.
#[derive(Debug)]
pub enum EngineInput {
    /// Inbound message from the bus.
    Bus(MqttMessage),
    /// Operator-initiated command.
    Command(EngineCommand),
    /// The firmware stale-lock watchdog fired.
    FirmwareWatchdog { generation: u64 },
}

/// Operator commands, each answered through a oneshot.
#[derive(Debug)]
pub enum EngineCommand {
    UpdateFirmware {
        device_id: String,
        reply: oneshot::Sender<FirmwareUpdateReply>,
    },
    RequestNetworkMap {
        reply: oneshot::Sender<String>,
    },
    SetProperty {
        device_id: String,
        property: String,
        value: Value,
        reply: oneshot::Sender<Result<()>>,
    },
    InvokeAction {
        device_id: String,
        action: String,
        input: Value,
        reply: oneshot::Sender<Result<()>>,
    },
    RemoveDevice {
        device_id: String,
        force: bool,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Mutable per-device state owned by the engine.
#[derive(Debug, Default)]
pub struct DeviceRuntimeState {
    /// `None` when the model has no `state` property and connectivity is
    /// not tracked for the device.
    pub connected: Option<bool>,
    pub values: HashMap<String, Value>,
    pub pending_firmware_update: bool,
}

#[derive(Debug)]
pub(crate) struct DeviceEntry {
    pub friendly_name: String,
    pub model: DeviceModel,
    pub runtime: DeviceRuntimeState,
    pub software_build_id: Option<String>,
}

pub struct DeviceSyncEngine {
    config: EngineConfig,
    devices: HashMap<String, DeviceEntry>,
    ids_by_name: HashMap<String, String>,
    fleet: FleetLifecycle,
    started_at: Instant,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    event_tx: mpsc::Sender<ModelEvent>,
    self_tx: mpsc::Sender<EngineInput>,
}

impl DeviceSyncEngine {
    /// `self_tx` must feed the same channel this engine is drained from; it
    /// schedules watchdog firings back into the handler sequence.
    pub fn new(
        config: EngineConfig,
        outbound_tx: mpsc::Sender<OutboundMessage>,
        event_tx: mpsc::Sender<ModelEvent>,
        self_tx: mpsc::Sender<EngineInput>,
    ) -> Self {
        Self {
            config,
            devices: HashMap::new(),
            ids_by_name: HashMap::new(),
            fleet: FleetLifecycle::new(),
            started_at: Instant::now(),
            outbound_tx,
            event_tx,
            self_tx,
        }
    }

    /// Drain inputs until every sender is gone.
    pub async fn run(mut self, mut input_rx: mpsc::Receiver<EngineInput>) {
        info!("Device sync engine started");
        while let Some(input) = input_rx.recv().await {
            self.handle(input).await;
        }
        info!("Device sync engine stopped");
    }

    pub async fn handle(&mut self, input: EngineInput) {
        match input {
            EngineInput::Bus(msg) => self.handle_bus_message(&msg.topic, &msg.payload).await,
            EngineInput::Command(command) => self.handle_command(command).await,
            EngineInput::FirmwareWatchdog { generation } => {
                self.handle_firmware_watchdog(generation).await;
            }
        }
    }

    pub fn device_model(&self, device_id: &str) -> Option<&DeviceModel> {
        self.devices.get(device_id).map(|entry| &entry.model)
    }

    pub fn device_runtime(&self, device_id: &str) -> Option<&DeviceRuntimeState> {
        self.devices.get(device_id).map(|entry| &entry.runtime)
    }

    pub fn fleet(&self) -> &FleetLifecycle {
        &self.fleet
    }

    async fn handle_bus_message(&mut self, topic: &str, payload: &str) {
        match topics::route(&self.config.topic_prefix, topic) {
            topics::RoutedTopic::BridgeDevices => self.handle_bridge_devices(payload).await,
            topics::RoutedTopic::NetworkMapResponse => {
                self.handle_network_map_response(payload).await;
            }
            topics::RoutedTopic::OtaUpdateResponse => self.handle_ota_response(payload).await,
            topics::RoutedTopic::DeviceAvailability(name) => {
                self.handle_availability(name, payload).await;
            }
            topics::RoutedTopic::DeviceMessage(name) => {
                self.handle_device_message(name, payload).await;
            }
            topics::RoutedTopic::Ignored => {}
        }
    }

    /// Model every not-yet-seen device in the fleet listing. Devices that
    /// drop out of the listing are retained; their runtime lives as long as
    /// the engine.
    async fn handle_bridge_devices(&mut self, payload: &str) {
        let items: Vec<Value> = match serde_json::from_str(payload) {
            Ok(items) => items,
            Err(e) => {
                warn!("Unparseable device listing: {}", e);
                return;
            }
        };
        for item in &items {
            self.admit_device(item).await;
        }
    }

    async fn admit_device(&mut self, item: &Value) {
        let Some(obj) = item.as_object() else { return };
        // The coordinator radio is not a device.
        if obj.get("type").and_then(Value::as_str) == Some("Coordinator") {
            return;
        }
        let Some(ieee) = obj.get("ieee_address").and_then(Value::as_str) else {
            debug!("Device descriptor without ieee_address, skipping");
            return;
        };
        let id = format!("{DEVICE_ID_PREFIX}{ieee}");
        if self.devices.contains_key(&id) {
            return;
        }
        let friendly = obj
            .get("friendly_name")
            .and_then(Value::as_str)
            .unwrap_or(ieee);
        let Some(definition) = obj.get("definition").filter(|d| d.is_object()) else {
            debug!("Device {} has no definition yet, skipping", friendly);
            return;
        };

        let exposes = definition
            .get("exposes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut model = DeviceModelBuilder::build(&exposes);
        model.description = definition
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);
        model.model_id = obj.get("model_id").and_then(Value::as_str).map(str::to_string);

        let entry = DeviceEntry {
            friendly_name: friendly.to_string(),
            runtime: DeviceRuntimeState {
                // Disconnected until proven otherwise, but only for devices
                // that expose a state at all.
                connected: model.properties.contains_key("state").then_some(false),
                ..Default::default()
            },
            software_build_id: obj
                .get("software_build_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            model: model.clone(),
        };

        info!(
            "Modeled device {} ({}): {} properties, {} actions, tags [{}]",
            id,
            friendly,
            entry.model.properties.len(),
            entry.model.actions.len(),
            entry
                .model
                .capabilities
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );

        self.ids_by_name.insert(friendly.to_string(), id.clone());
        self.ids_by_name.insert(ieee.to_string(), id.clone());
        self.devices.insert(id.clone(), entry);
        self.emit(ModelEvent::DeviceAdded { id, model }).await;

        // Let the device settle before the initial state read.
        let outbound = self.outbound_tx.clone();
        let topic = topics::get_topic(&self.config.topic_prefix, friendly);
        let settle = Duration::from_millis(self.config.settle_delay_ms);
        tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            let _ = outbound
                .send(OutboundMessage {
                    topic,
                    payload: GET_STATE_PAYLOAD.to_string(),
                })
                .await;
        });
    }

    async fn handle_availability(&mut self, name: &str, payload: &str) {
        let grace = Duration::from_secs(self.config.availability_grace_secs);
        if self.started_at.elapsed() < grace {
            debug!(
                "Ignoring availability for {} during startup grace period",
                name
            );
            return;
        }
        let Some(id) = self.ids_by_name.get(name).cloned() else {
            debug!("Availability for unmodeled device {}, dropping", name);
            return;
        };
        match payload.trim() {
            "online" => self.handle_online(&id).await,
            "offline" => self.handle_offline(&id).await,
            other => debug!("Unrecognized availability payload for {}: {}", name, other),
        }
    }

    async fn handle_online(&mut self, id: &str) {
        let event_tx = self.event_tx.clone();
        let Some(entry) = self.devices.get_mut(id) else { return };
        if entry.runtime.connected.is_none() {
            return;
        }
        entry.runtime.connected = Some(true);
        let friendly = entry.friendly_name.clone();
        let _ = event_tx
            .send(ModelEvent::ConnectivityChanged {
                id: id.to_string(),
                connected: true,
            })
            .await;
        // Resynchronize the true state after the outage.
        self.send_outbound(
            topics::get_topic(&self.config.topic_prefix, &friendly),
            GET_STATE_PAYLOAD.to_string(),
        )
        .await;
    }

    async fn handle_offline(&mut self, id: &str) {
        let policy = self.config.offline_policy;
        let toggle_off = matches!(policy, OfflinePolicy::ToggleOff | OfflinePolicy::Both);
        let disconnect = matches!(policy, OfflinePolicy::Disconnected | OfflinePolicy::Both);

        let event_tx = self.event_tx.clone();
        let Some(entry) = self.devices.get_mut(id) else { return };

        if toggle_off && entry.model.properties.contains_key("state") {
            entry
                .runtime
                .values
                .insert("state".to_string(), Value::Bool(false));
            let _ = event_tx
                .send(ModelEvent::PropertyChanged {
                    id: id.to_string(),
                    name: "state".to_string(),
                    value: Value::Bool(false),
                })
                .await;
        }
        if disconnect && entry.runtime.connected.is_some() {
            entry.runtime.connected = Some(false);
            let _ = event_tx
                .send(ModelEvent::ConnectivityChanged {
                    id: id.to_string(),
                    connected: false,
                })
                .await;
        }
    }

    pub(crate) async fn emit(&self, event: ModelEvent) {
        if self.event_tx.send(event).await.is_err() {
            warn!("Model event channel closed");
        }
    }

    pub(crate) async fn send_outbound(&self, topic: String, payload: String) {
        debug!("Outbound request to {}: {}", topic, payload);
        if self
            .outbound_tx
            .send(OutboundMessage { topic, payload })
            .await
            .is_err()
        {
            warn!("Outbound message channel closed");
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::config::Config;
    use serde_json::json;

    pub(crate) struct TestEngine {
        pub engine: DeviceSyncEngine,
        pub outbound_rx: mpsc::Receiver<OutboundMessage>,
        pub event_rx: mpsc::Receiver<ModelEvent>,
        pub input_tx: mpsc::Sender<EngineInput>,
        pub input_rx: mpsc::Receiver<EngineInput>,
    }

    pub(crate) fn test_engine(mutate: impl FnOnce(&mut EngineConfig)) -> TestEngine {
        let mut config = Config::default().engine;
        // Tests opt back into the grace period explicitly.
        config.availability_grace_secs = 0;
        mutate(&mut config);
        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        let (event_tx, event_rx) = mpsc::channel(256);
        let (input_tx, input_rx) = mpsc::channel(256);
        let engine = DeviceSyncEngine::new(config, outbound_tx, event_tx, input_tx.clone());
        TestEngine {
            engine,
            outbound_rx,
            event_rx,
            input_tx,
            input_rx,
        }
    }

    pub(crate) fn bus(topic: &str, payload: &str) -> EngineInput {
        EngineInput::Bus(MqttMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        })
    }

    /// A small fleet: a color bulb and a battery push button.
    pub(crate) fn fleet_listing() -> String {
        json!([
            {
                "ieee_address": "0x00124b00aa",
                "friendly_name": "bulb",
                "type": "Router",
                "model_id": "LCT015",
                "software_build_id": "1.50.2",
                "definition": {
                    "description": "Hue color bulb",
                    "exposes": [
                        {
                            "type": "light",
                            "features": [
                                {
                                    "type": "binary",
                                    "name": "state",
                                    "property": "state",
                                    "access": 7,
                                    "value_on": "ON",
                                    "value_off": "OFF"
                                },
                                {
                                    "type": "numeric",
                                    "name": "brightness",
                                    "property": "brightness",
                                    "access": 7,
                                    "value_min": 0,
                                    "value_max": 254
                                },
                                {
                                    "type": "composite",
                                    "name": "color_xy",
                                    "property": "color",
                                    "access": 7,
                                    "features": [
                                        {"type": "numeric", "name": "x", "property": "x", "access": 7},
                                        {"type": "numeric", "name": "y", "property": "y", "access": 7}
                                    ]
                                }
                            ]
                        },
                        {
                            "type": "numeric",
                            "name": "linkquality",
                            "property": "linkquality",
                            "access": 1
                        }
                    ]
                }
            },
            {
                "ieee_address": "0x00124b00bb",
                "friendly_name": "button",
                "type": "EndDevice",
                "model_id": "WXKG01LM",
                "definition": {
                    "description": "Wireless button",
                    "exposes": [
                        {
                            "type": "enum",
                            "name": "action",
                            "property": "action",
                            "access": 1,
                            "values": ["on", "off"]
                        },
                        {
                            "type": "numeric",
                            "name": "battery",
                            "property": "battery",
                            "access": 1,
                            "unit": "%"
                        }
                    ]
                }
            },
            {
                "ieee_address": "0x00124b0000",
                "friendly_name": "Coordinator",
                "type": "Coordinator"
            }
        ])
        .to_string()
    }

    pub(crate) async fn admit_fleet(harness: &mut TestEngine) {
        harness
            .engine
            .handle(bus("zigbee2mqtt/bridge/devices", &fleet_listing()))
            .await;
        // Drain the two DeviceAdded events.
        while let Ok(event) = harness.event_rx.try_recv() {
            let _ = event;
        }
    }

    pub(crate) const BULB: &str = "z2m-0x00124b00aa";
    pub(crate) const BUTTON: &str = "z2m-0x00124b00bb";
}
