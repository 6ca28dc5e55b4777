//! The synthesized device model: typed properties, actions, declared
//! events, and semantic capability tags.

pub mod builder;
pub mod classify;

use crate::error::{BridgeError, Result};
use crate::transform;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;

/// Wire type family of a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WireType {
    Boolean,
    Integer,
    Number,
    String,
}

/// Device-level semantic capability tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum DeviceCapability {
    Light,
    OnOffSwitch,
    Lock,
    Thermostat,
    ColorControl,
    MotionSensor,
    PushButton,
}

/// Property-level semantic capability tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum PropertyCapability {
    OnOff,
    Pushed,
    Brightness,
    ColorTemperature,
    Color,
    TargetTemperature,
    Temperature,
    Motion,
    Locked,
}

/// Wire-value to model-value codec.
///
/// A closed set of conversions rather than arbitrary closures, so codecs
/// stay comparable and testable in isolation. `ScaledPercentage` doubles as
/// the marker that a property was re-encoded from raw units, carrying the
/// original wire maximum.
#[derive(Debug, Clone, PartialEq)]
pub enum Codec {
    Identity,
    OnOff { value_on: Value, value_off: Value },
    ScaledPercentage { origin_max: f64 },
    ColorHex,
}

impl Codec {
    /// Decode an inbound wire value into a model value.
    pub fn from_wire(&self, wire: &Value) -> Result<Value> {
        match self {
            Codec::Identity => Ok(wire.clone()),
            Codec::OnOff { value_on, .. } => Ok(Value::Bool(wire == value_on)),
            Codec::ScaledPercentage { origin_max } => {
                let raw = wire.as_f64().ok_or_else(|| {
                    BridgeError::Conversion(format!("expected a number, got {wire}"))
                })?;
                Ok(json!(transform::integer_to_percentage(raw, *origin_max)))
            }
            Codec::ColorHex => Ok(Value::String(transform::color::color_payload_to_hex(
                wire, None,
            ))),
        }
    }

    /// Encode a model value into its wire representation.
    pub fn to_wire(&self, value: &Value) -> Result<Value> {
        match self {
            Codec::Identity => Ok(value.clone()),
            Codec::OnOff {
                value_on,
                value_off,
            } => {
                let on = value.as_bool().ok_or_else(|| {
                    BridgeError::Conversion(format!("expected a boolean, got {value}"))
                })?;
                Ok(if on {
                    value_on.clone()
                } else {
                    value_off.clone()
                })
            }
            Codec::ScaledPercentage { origin_max } => {
                let percentage = value.as_f64().ok_or_else(|| {
                    BridgeError::Conversion(format!("expected a number, got {value}"))
                })?;
                Ok(json!(transform::percentage_to_integer(
                    percentage,
                    *origin_max
                )))
            }
            // zigbee2mqtt accepts hex strings directly in the color object.
            Codec::ColorHex => {
                let hex = value.as_str().ok_or_else(|| {
                    BridgeError::Conversion(format!("expected a hex string, got {value}"))
                })?;
                Ok(json!({ "hex": hex }))
            }
        }
    }
}

/// One observable or controllable characteristic of a device.
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    pub name: String,
    pub title: String,
    pub description: Option<String>,
    pub wire_type: WireType,
    pub unit: Option<String>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub multiple_of: Option<f64>,
    pub enum_values: Option<Vec<String>>,
    pub read_only: bool,
    pub capability: Option<PropertyCapability>,
    pub codec: Codec,
}

impl PropertyDescriptor {
    /// A plain descriptor with identity codec and no bounds; the factory
    /// fills in the rest per wire type.
    pub fn new(name: impl Into<String>, wire_type: WireType) -> Self {
        let name = name.into();
        Self {
            title: derive_title(&name),
            name,
            description: None,
            wire_type,
            unit: None,
            minimum: None,
            maximum: None,
            multiple_of: None,
            enum_values: None,
            read_only: true,
            capability: None,
            codec: Codec::Identity,
        }
    }
}

/// A fire-and-forget command the device accepts.
#[derive(Debug, Clone)]
pub struct ActionDescriptor {
    pub title: String,
    pub description: Option<String>,
    pub input: PropertyDescriptor,
}

/// A transient occurrence the device announces (button presses and the
/// like), declared by the schema's `action` value list.
#[derive(Debug, Clone)]
pub struct EventDescriptor {
    pub title: String,
}

/// The synthesized model of one device. Built once when the device's schema
/// first arrives; immutable afterwards except for auto-vivified property
/// additions.
#[derive(Debug, Clone, Default)]
pub struct DeviceModel {
    pub capabilities: Vec<DeviceCapability>,
    pub properties: HashMap<String, PropertyDescriptor>,
    pub actions: HashMap<String, ActionDescriptor>,
    pub events: HashMap<String, EventDescriptor>,
    pub description: Option<String>,
    pub model_id: Option<String>,
}

impl DeviceModel {
    /// Append a capability tag, keeping the set ordered and duplicate-free.
    pub fn add_capability(&mut self, capability: DeviceCapability) {
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
    }

    /// Add a property unless one with the same name already exists.
    pub fn add_property(&mut self, descriptor: PropertyDescriptor) {
        if !self.properties.contains_key(&descriptor.name) {
            self.properties.insert(descriptor.name.clone(), descriptor);
        }
    }
}

/// Human-facing title for a property name: underscores become spaces, only
/// the first character is capitalized.
pub fn derive_title(name: &str) -> String {
    match name {
        "linkquality" => "Link quality".to_string(),
        "power state" => "State".to_string(),
        _ => {
            let spaced = name.replace('_', " ");
            let mut chars = spaced.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        }
    }
}
