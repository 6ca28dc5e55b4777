//! Ingestion of regular device telemetry: per-key property dispatch,
//! value conversion, and on-demand descriptor creation.

use super::{DeviceSyncEngine, ModelEvent};
use crate::model::{Codec, PropertyDescriptor, WireType};
use crate::transform;
use crate::transform::color::color_payload_to_hex;
use log::{debug, info, warn};
use serde_json::{Map, Value};

/// Wire keys that are bridge bookkeeping, never device properties.
const BOOKKEEPING_KEYS: [&str; 2] = ["update", "update_available"];

impl DeviceSyncEngine {
    pub(crate) async fn handle_device_message(&mut self, name: &str, payload: &str) {
        let Some(id) = self.ids_by_name.get(name).cloned() else {
            debug!("Message for unmodeled device {}, dropping", name);
            return;
        };
        let payload: Map<String, Value> = match serde_json::from_str::<Value>(payload) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                warn!("Non-object payload for {}, dropping: {}", name, other);
                return;
            }
            Err(e) => {
                warn!("Unparseable payload for {}: {}", name, e);
                return;
            }
        };

        // A user-paused device drops everything.
        if let Some(entry) = self.devices.get(&id)
            && entry.runtime.values.get("data_transmission") == Some(&Value::Bool(false))
        {
            debug!("Data transmission paused for {}, dropping message", name);
            return;
        }

        // Firmware progress rides along in the bookkeeping field.
        if payload
            .get("update")
            .and_then(|update| update.get("state"))
            .and_then(Value::as_str)
            == Some("updating")
        {
            self.note_device_updating(&id).await;
        }

        // A declared device event fires before property dispatch and never
        // suppresses it.
        if let Some(action) = payload.get("action").and_then(Value::as_str) {
            let declared = self
                .devices
                .get(&id)
                .is_some_and(|entry| entry.model.events.contains_key(action));
            if declared {
                let data = self
                    .config
                    .event_data_field
                    .as_ref()
                    .and_then(|field| payload.get(field).cloned());
                self.emit(ModelEvent::DeviceEvent {
                    id: id.clone(),
                    name: action.to_string(),
                    data,
                })
                .await;
            }
        }

        // Derived boolean mirror, independent of normal dispatch.
        if let Some(on) = transform::mirrored_power_state(&payload) {
            self.mirror_power_state(&id, on).await;
        }

        for (key, value) in &payload {
            if BOOKKEEPING_KEYS.contains(&key.as_str()) {
                continue;
            }
            self.apply_property_value(&id, key, value, &payload).await;
        }
    }

    async fn mirror_power_state(&mut self, id: &str, on: bool) {
        let event_tx = self.event_tx.clone();
        let Some(entry) = self.devices.get_mut(id) else { return };
        if !entry.model.properties.contains_key("power state") {
            return;
        }
        entry
            .runtime
            .values
            .insert("power state".to_string(), Value::Bool(on));
        let _ = event_tx
            .send(ModelEvent::PropertyChanged {
                id: id.to_string(),
                name: "power state".to_string(),
                value: Value::Bool(on),
            })
            .await;
    }

    /// Apply one payload key. A conversion failure drops this key only;
    /// the caller proceeds with the siblings.
    async fn apply_property_value(
        &mut self,
        id: &str,
        key: &str,
        value: &Value,
        payload: &Map<String, Value>,
    ) {
        let event_tx = self.event_tx.clone();
        let Some(entry) = self.devices.get_mut(id) else { return };

        let descriptor = match entry.model.properties.get(key) {
            Some(descriptor) => descriptor.clone(),
            None => {
                let Some(wire_type) = infer_wire_type(value) else {
                    debug!(
                        "No descriptor for {} on {} and value is structured, dropping key",
                        key, id
                    );
                    return;
                };
                let descriptor = PropertyDescriptor::new(key, wire_type);
                info!("Auto-vivified property {} on {}", key, id);
                entry.model.add_property(descriptor.clone());
                let _ = event_tx
                    .send(ModelEvent::PropertyVivified {
                        id: id.to_string(),
                        descriptor: descriptor.clone(),
                    })
                    .await;
                // Retry resolution once now that the descriptor exists.
                match entry.model.properties.get(key) {
                    Some(descriptor) => descriptor.clone(),
                    None => return,
                }
            }
        };

        let converted = match &descriptor.codec {
            // The color payload's brightness sibling feeds the conversion.
            Codec::ColorHex => Ok(Value::String(color_payload_to_hex(
                value,
                payload.get("brightness").and_then(Value::as_f64),
            ))),
            codec => codec.from_wire(value),
        };

        match converted {
            Ok(model_value) => {
                entry
                    .runtime
                    .values
                    .insert(key.to_string(), model_value.clone());
                let _ = event_tx
                    .send(ModelEvent::PropertyChanged {
                        id: id.to_string(),
                        name: key.to_string(),
                        value: model_value,
                    })
                    .await;
            }
            Err(e) => {
                warn!("Dropping {} for {}: {}", key, id, e);
            }
        }
    }
}

/// Best-effort wire-type inference from a single observed value. Nested
/// structures and null have no inferable type; a later value of a
/// different shape for the same key is an accepted heuristic miss.
fn infer_wire_type(value: &Value) -> Option<WireType> {
    match value {
        Value::Bool(_) => Some(WireType::Boolean),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(WireType::Integer),
        Value::Number(_) => Some(WireType::Number),
        Value::String(_) => Some(WireType::String),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_property_values_are_converted_and_cached() {
        let mut harness = test_engine(|_| {});
        admit_fleet(&mut harness).await;

        harness
            .engine
            .handle(bus(
                "zigbee2mqtt/bulb",
                &json!({"state": "ON", "brightness": 254, "linkquality": 66}).to_string(),
            ))
            .await;

        let runtime = harness.engine.device_runtime(BULB).unwrap();
        assert_eq!(runtime.values.get("state"), Some(&json!(true)));
        // Full wire brightness floors to within one percent of 100.
        let brightness = runtime.values.get("brightness").unwrap().as_i64().unwrap();
        assert!((99..=100).contains(&brightness));
        assert_eq!(runtime.values.get("linkquality"), Some(&json!(66)));

        let mut changed = 0;
        while let Ok(event) = harness.event_rx.try_recv() {
            if matches!(event, ModelEvent::PropertyChanged { .. }) {
                changed += 1;
            }
        }
        assert_eq!(changed, 3);
    }

    #[tokio::test]
    async fn test_color_payload_converts_to_hex() {
        let mut harness = test_engine(|_| {});
        admit_fleet(&mut harness).await;

        harness
            .engine
            .handle(bus(
                "zigbee2mqtt/bulb",
                &json!({"color": {"x": 0.3127, "y": 0.3290}, "brightness": 254}).to_string(),
            ))
            .await;

        let runtime = harness.engine.device_runtime(BULB).unwrap();
        let hex = runtime.values.get("color").unwrap().as_str().unwrap();
        assert_eq!(hex.len(), 7);
        assert!(hex.starts_with('#'));
    }

    #[tokio::test]
    async fn test_color_without_coordinates_falls_back_to_white() {
        let mut harness = test_engine(|_| {});
        admit_fleet(&mut harness).await;

        harness
            .engine
            .handle(bus(
                "zigbee2mqtt/bulb",
                &json!({"color": {"hue": 12}, "state": "ON"}).to_string(),
            ))
            .await;

        let runtime = harness.engine.device_runtime(BULB).unwrap();
        assert_eq!(runtime.values.get("color"), Some(&json!("#FFFFFF")));
        // The sibling key still processed.
        assert_eq!(runtime.values.get("state"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_conversion_failure_drops_single_key() {
        let mut harness = test_engine(|_| {});
        admit_fleet(&mut harness).await;

        harness
            .engine
            .handle(bus(
                "zigbee2mqtt/bulb",
                &json!({"brightness": "very", "linkquality": 47}).to_string(),
            ))
            .await;

        let runtime = harness.engine.device_runtime(BULB).unwrap();
        assert!(runtime.values.get("brightness").is_none());
        assert_eq!(runtime.values.get("linkquality"), Some(&json!(47)));
    }

    #[tokio::test]
    async fn test_unknown_device_message_is_dropped() {
        let mut harness = test_engine(|_| {});
        admit_fleet(&mut harness).await;

        harness
            .engine
            .handle(bus("zigbee2mqtt/ghost", &json!({"state": "ON"}).to_string()))
            .await;
        assert!(harness.event_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_auto_vivification() {
        let mut harness = test_engine(|_| {});
        admit_fleet(&mut harness).await;

        harness
            .engine
            .handle(bus(
                "zigbee2mqtt/bulb",
                &json!({"power_on_behavior": "previous", "device_temperature": 23}).to_string(),
            ))
            .await;

        let model = harness.engine.device_model(BULB).unwrap();
        let vivified = &model.properties["power_on_behavior"];
        assert_eq!(vivified.wire_type, WireType::String);
        assert!(vivified.read_only);
        assert_eq!(
            model.properties["device_temperature"].wire_type,
            WireType::Integer
        );

        let runtime = harness.engine.device_runtime(BULB).unwrap();
        assert_eq!(
            runtime.values.get("power_on_behavior"),
            Some(&json!("previous"))
        );

        let mut vivified_events = 0;
        while let Ok(event) = harness.event_rx.try_recv() {
            if matches!(event, ModelEvent::PropertyVivified { .. }) {
                vivified_events += 1;
            }
        }
        assert_eq!(vivified_events, 2);
    }

    #[tokio::test]
    async fn test_auto_vivification_skips_structures_and_bookkeeping() {
        let mut harness = test_engine(|_| {});
        admit_fleet(&mut harness).await;

        harness
            .engine
            .handle(bus(
                "zigbee2mqtt/bulb",
                &json!({
                    "update": {"state": "idle"},
                    "update_available": false,
                    "gradient": [1, 2, 3],
                    "nested": {"a": 1},
                    "nothing": null
                })
                .to_string(),
            ))
            .await;

        let model = harness.engine.device_model(BULB).unwrap();
        assert!(!model.properties.contains_key("update"));
        assert!(!model.properties.contains_key("update_available"));
        assert!(!model.properties.contains_key("gradient"));
        assert!(!model.properties.contains_key("nested"));
        assert!(!model.properties.contains_key("nothing"));
    }

    #[tokio::test]
    async fn test_vivified_type_survives_shape_change() {
        let mut harness = test_engine(|_| {});
        admit_fleet(&mut harness).await;

        harness
            .engine
            .handle(bus("zigbee2mqtt/bulb", &json!({"illuminance": 120}).to_string()))
            .await;
        assert_eq!(
            harness.engine.device_model(BULB).unwrap().properties["illuminance"].wire_type,
            WireType::Integer
        );

        // A later string value for the same key still flows through the
        // identity codec; the descriptor keeps its first-seen type.
        harness
            .engine
            .handle(bus("zigbee2mqtt/bulb", &json!({"illuminance": "dim"}).to_string()))
            .await;
        let runtime = harness.engine.device_runtime(BULB).unwrap();
        assert_eq!(runtime.values.get("illuminance"), Some(&json!("dim")));
        assert_eq!(
            harness.engine.device_model(BULB).unwrap().properties["illuminance"].wire_type,
            WireType::Integer
        );
    }

    #[tokio::test]
    async fn test_data_transmission_gate_drops_messages() {
        let mut harness = test_engine(|_| {});
        admit_fleet(&mut harness).await;

        // The gate property itself arrives over the wire.
        harness
            .engine
            .handle(bus(
                "zigbee2mqtt/bulb",
                &json!({"data_transmission": false}).to_string(),
            ))
            .await;
        while harness.event_rx.try_recv().is_ok() {}

        harness
            .engine
            .handle(bus("zigbee2mqtt/bulb", &json!({"state": "ON"}).to_string()))
            .await;

        let runtime = harness.engine.device_runtime(BULB).unwrap();
        assert!(runtime.values.get("state").is_none());
        assert!(harness.event_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_declared_event_fires_and_action_still_dispatches() {
        let mut harness = test_engine(|_| {});
        admit_fleet(&mut harness).await;

        harness
            .engine
            .handle(bus("zigbee2mqtt/button", &json!({"action": "on"}).to_string()))
            .await;

        let mut saw_event = false;
        let mut action_dispatched = false;
        let mut power_state_mirrored = false;
        while let Ok(event) = harness.event_rx.try_recv() {
            match event {
                ModelEvent::DeviceEvent { name, .. } if name == "on" => saw_event = true,
                ModelEvent::PropertyChanged { name, value, .. } => {
                    if name == "action" {
                        action_dispatched = true;
                        assert_eq!(value, json!("on"));
                    } else if name == "power state" {
                        power_state_mirrored = true;
                        assert_eq!(value, json!(true));
                    }
                }
                _ => {}
            }
        }
        assert!(saw_event, "declared event must fire");
        assert!(action_dispatched, "event must not suppress dispatch");
        assert!(power_state_mirrored, "derived boolean must mirror");
    }

    #[tokio::test]
    async fn test_event_data_field_extraction() {
        let mut harness = test_engine(|config| {
            config.event_data_field = Some("action_rate".to_string());
        });
        admit_fleet(&mut harness).await;

        harness
            .engine
            .handle(bus(
                "zigbee2mqtt/button",
                &json!({"action": "off", "action_rate": 3}).to_string(),
            ))
            .await;

        let mut data = None;
        while let Ok(event) = harness.event_rx.try_recv() {
            if let ModelEvent::DeviceEvent { data: d, .. } = event {
                data = d;
            }
        }
        assert_eq!(data, Some(json!(3)));
    }

    #[tokio::test]
    async fn test_power_state_not_mirrored_when_state_present() {
        let mut harness = test_engine(|_| {});
        admit_fleet(&mut harness).await;

        harness
            .engine
            .handle(bus(
                "zigbee2mqtt/button",
                &json!({"action": "on", "state": "whatever"}).to_string(),
            ))
            .await;

        let runtime = harness.engine.device_runtime(BUTTON).unwrap();
        assert!(runtime.values.get("power state").is_none());
    }

    #[test]
    fn test_infer_wire_type_guards() {
        assert_eq!(infer_wire_type(&json!(true)), Some(WireType::Boolean));
        assert_eq!(infer_wire_type(&json!(7)), Some(WireType::Integer));
        assert_eq!(infer_wire_type(&json!(7.5)), Some(WireType::Number));
        assert_eq!(infer_wire_type(&json!("x")), Some(WireType::String));
        assert_eq!(infer_wire_type(&json!(null)), None);
        assert_eq!(infer_wire_type(&json!([1])), None);
        assert_eq!(infer_wire_type(&json!({"a": 1})), None);
    }
}
