//! Operator commands and the fleet lifecycle flows they drive.

use super::{DeviceSyncEngine, EngineCommand, EngineInput, FirmwareUpdateReply, ModelEvent};
use crate::error::{BridgeError, Result};
use crate::mqtt::topics;
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tokio::time::Instant;

/// Terminal firmware-update report from the bridge.
#[derive(Debug, Deserialize)]
struct OtaResponse {
    status: Option<String>,
    #[serde(default)]
    data: OtaResponseData,
}

#[derive(Debug, Default, Deserialize)]
struct OtaResponseData {
    id: Option<String>,
    from: Option<OtaVersion>,
    to: Option<OtaVersion>,
}

#[derive(Debug, Deserialize)]
struct OtaVersion {
    software_build_id: Option<String>,
}

impl DeviceSyncEngine {
    pub(crate) async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::UpdateFirmware { device_id, reply } => {
                let result = self.start_firmware_update(&device_id).await;
                let _ = reply.send(result);
            }
            EngineCommand::RequestNetworkMap { reply } => {
                let graph = self.request_network_map().await;
                let _ = reply.send(graph);
            }
            EngineCommand::SetProperty {
                device_id,
                property,
                value,
                reply,
            } => {
                let _ = reply.send(self.set_property(&device_id, &property, value).await);
            }
            EngineCommand::InvokeAction {
                device_id,
                action,
                input,
                reply,
            } => {
                let _ = reply.send(self.invoke_action(&device_id, &action, input).await);
            }
            EngineCommand::RemoveDevice {
                device_id,
                force,
                reply,
            } => {
                let _ = reply.send(self.remove_device(&device_id, force).await);
            }
        }
    }

    /// Start a firmware update for one device, fleet-wide single-flight.
    async fn start_firmware_update(&mut self, device_id: &str) -> FirmwareUpdateReply {
        let Some(entry) = self.devices.get(device_id) else {
            return FirmwareUpdateReply::UnknownDevice;
        };
        let friendly = entry.friendly_name.clone();

        let Some(generation) = self.fleet.begin_firmware_update(device_id) else {
            info!(
                "Firmware update for {} rejected, another update is in flight",
                device_id
            );
            return FirmwareUpdateReply::PleaseWait;
        };

        if let Some(entry) = self.devices.get_mut(device_id) {
            entry.runtime.pending_firmware_update = true;
        }
        info!("Firmware update requested for {} ({})", device_id, friendly);
        self.emit(ModelEvent::FirmwareUpdateChanged {
            state: self.fleet.firmware_state(),
            device_id: Some(device_id.to_string()),
        })
        .await;
        self.send_outbound(
            topics::ota_update_request_topic(&self.config.topic_prefix),
            json!({ "id": friendly }).to_string(),
        )
        .await;

        // Stale-lock watchdog: recover if the terminal signal is lost.
        let self_tx = self.self_tx.clone();
        let timeout = Duration::from_secs(self.config.firmware_watchdog_secs);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = self_tx
                .send(EngineInput::FirmwareWatchdog { generation })
                .await;
        });

        FirmwareUpdateReply::Started
    }

    /// The device under update reported it is flashing.
    pub(crate) async fn note_device_updating(&mut self, device_id: &str) {
        if self.fleet.firmware_device() != Some(device_id) {
            return;
        }
        if self.fleet.note_updating() {
            info!("Device {} is flashing firmware", device_id);
            self.emit(ModelEvent::FirmwareUpdateChanged {
                state: self.fleet.firmware_state(),
                device_id: Some(device_id.to_string()),
            })
            .await;
        }
    }

    pub(crate) async fn handle_ota_response(&mut self, payload: &str) {
        if !self.fleet.firmware_in_flight() {
            debug!("Stray firmware update response, ignoring");
            return;
        }
        let response: OtaResponse = match serde_json::from_str(payload) {
            Ok(response) => response,
            Err(e) => {
                warn!("Unparseable firmware update response: {}", e);
                return;
            }
        };

        let from = response
            .data
            .from
            .and_then(|version| version.software_build_id);
        let to = response.data.to.and_then(|version| version.software_build_id);
        // A reported failure, or a version that did not move, both count as
        // failed; the lock is released either way.
        let success = response.status.as_deref() == Some("ok")
            && to.is_some()
            && from != to;

        let device_id = self.fleet.finish_firmware_update(success);
        if let Some(device_id) = &device_id
            && let Some(entry) = self.devices.get_mut(device_id)
        {
            entry.runtime.pending_firmware_update = false;
            if success {
                entry.software_build_id = to.clone();
            }
        }

        match (&device_id, success) {
            (Some(id), true) => info!(
                "Firmware update for {} finished: {:?} -> {:?}",
                id, from, to
            ),
            (Some(id), false) => warn!(
                "Firmware update for {} failed (status {:?}, reported id {:?})",
                id, response.status, response.data.id
            ),
            (None, _) => warn!("Firmware update finished with no device on record"),
        }

        self.emit(ModelEvent::FirmwareUpdateChanged {
            state: self.fleet.firmware_state(),
            device_id,
        })
        .await;
    }

    pub(crate) async fn handle_firmware_watchdog(&mut self, generation: u64) {
        let Some(device_id) = self.fleet.expire_firmware_watchdog(generation) else {
            return;
        };
        warn!(
            "Firmware update for {} timed out with no terminal signal, releasing lock",
            device_id
        );
        if let Some(entry) = self.devices.get_mut(&device_id) {
            entry.runtime.pending_firmware_update = false;
        }
        self.emit(ModelEvent::FirmwareUpdateChanged {
            state: self.fleet.firmware_state(),
            device_id: Some(device_id),
        })
        .await;
    }

    /// Request a topology snapshot, rate-limited by the cooldown window.
    /// Always returns a renderable graph immediately; a fresh snapshot
    /// arrives later through [`ModelEvent::NetworkMapReady`].
    async fn request_network_map(&mut self) -> String {
        let now = Instant::now();
        let cooldown = Duration::from_secs(self.config.map_cooldown_secs);
        if self.fleet.should_request_map(now, cooldown) {
            self.fleet.mark_map_requested(now);
            self.send_outbound(
                topics::network_map_request_topic(&self.config.topic_prefix),
                json!({"type": "graphviz", "routes": false}).to_string(),
            )
            .await;
        } else {
            debug!("Network map request suppressed by cooldown");
        }
        self.fleet.current_map().to_string()
    }

    pub(crate) async fn handle_network_map_response(&mut self, payload: &str) {
        let graph = serde_json::from_str::<Value>(payload)
            .ok()
            .and_then(|response| {
                response
                    .get("data")
                    .and_then(|data| data.get("value"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });
        let Some(graph) = graph else {
            warn!("Network map response without a graph payload");
            return;
        };
        info!("Network map snapshot received ({} bytes)", graph.len());
        self.fleet.store_map(graph.clone());
        self.emit(ModelEvent::NetworkMapReady { graph }).await;
    }

    /// Command a writable property; the new value is confirmed by the
    /// device's own state echo, not cached optimistically.
    async fn set_property(&mut self, device_id: &str, property: &str, value: Value) -> Result<()> {
        let (friendly, wire) = {
            let entry = self
                .devices
                .get(device_id)
                .ok_or_else(|| BridgeError::UnknownDevice(device_id.to_string()))?;
            let descriptor = entry
                .model
                .properties
                .get(property)
                .ok_or_else(|| BridgeError::UnknownProperty(property.to_string()))?;
            if descriptor.read_only {
                return Err(BridgeError::ReadOnlyProperty(property.to_string()));
            }
            (entry.friendly_name.clone(), descriptor.codec.to_wire(&value)?)
        };

        let mut payload = Map::new();
        payload.insert(property.to_string(), wire);
        self.send_outbound(
            topics::set_topic(&self.config.topic_prefix, &friendly),
            Value::Object(payload).to_string(),
        )
        .await;
        Ok(())
    }

    async fn invoke_action(&mut self, device_id: &str, action: &str, input: Value) -> Result<()> {
        let (friendly, wire) = {
            let entry = self
                .devices
                .get(device_id)
                .ok_or_else(|| BridgeError::UnknownDevice(device_id.to_string()))?;
            let descriptor = entry
                .model
                .actions
                .get(action)
                .ok_or_else(|| BridgeError::UnknownAction(action.to_string()))?;
            (
                entry.friendly_name.clone(),
                descriptor.input.codec.to_wire(&input)?,
            )
        };

        let mut payload = Map::new();
        payload.insert(action.to_string(), wire);
        self.send_outbound(
            topics::set_topic(&self.config.topic_prefix, &friendly),
            Value::Object(payload).to_string(),
        )
        .await;
        Ok(())
    }

    /// Ask the bridge to drop a device from the network. The model is kept
    /// until the engine itself goes away.
    async fn remove_device(&mut self, device_id: &str, force: bool) -> Result<()> {
        let friendly = self
            .devices
            .get(device_id)
            .map(|entry| entry.friendly_name.clone())
            .ok_or_else(|| BridgeError::UnknownDevice(device_id.to_string()))?;
        info!("Requesting removal of {} (force: {})", device_id, force);
        self.send_outbound(
            topics::device_remove_request_topic(&self.config.topic_prefix),
            json!({ "id": friendly, "force": force }).to_string(),
        )
        .await;
        Ok(())
    }
}
