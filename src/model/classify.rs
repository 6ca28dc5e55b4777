//! Classification of a single schema leaf into a property or action
//! descriptor, plus the semantic tagging and synthetic-property rules.

use super::{
    ActionDescriptor, Codec, DeviceCapability, EventDescriptor, PropertyCapability,
    PropertyDescriptor, WireType, derive_title,
};
use crate::schema::{Access, Expose};
use log::debug;
use serde_json::Value;

/// Outcome of classifying one leaf expose.
#[derive(Debug, Clone)]
pub enum Classified {
    Property(PropertyDescriptor),
    Action(String, ActionDescriptor),
}

/// Side effects a leaf can have beyond its own descriptor.
#[derive(Debug, Clone, Default)]
pub struct ClassifySideEffects {
    /// Device-level tag implied by the leaf (e.g. `MotionSensor`).
    pub device_capability: Option<DeviceCapability>,
    /// Extra synthesized property (the derived `power state`).
    pub synthetic_property: Option<PropertyDescriptor>,
    /// Declared device event names (from an `action` enum's value list).
    pub events: Vec<(String, EventDescriptor)>,
}

/// Classify a leaf that carries both `access` and a usable `name`.
///
/// `known_names` is the walker's pre-computed property-name set; the
/// synthetic `power state` rule both consults and extends it so the same
/// device never synthesizes the property twice.
pub fn classify_leaf(
    expose: &Expose,
    known_names: &mut Vec<String>,
) -> Option<(Classified, ClassifySideEffects)> {
    let access = expose.access?;
    let name = expose.name?;
    let mut effects = ClassifySideEffects::default();

    let mut descriptor = match expose.kind {
        Some("binary") => binary_descriptor(expose, name),
        Some("numeric") => numeric_descriptor(expose, name, access),
        Some("enum") => enum_descriptor(expose, name, access, known_names, &mut effects),
        Some("text") => PropertyDescriptor::new(name, WireType::String),
        other => {
            debug!("Skipping expose {name:?} with unsupported type {other:?}");
            return None;
        }
    };

    descriptor.description = expose.description.map(str::to_string);
    if descriptor.unit.is_none() {
        descriptor.unit = expose.unit.map(str::to_string);
    }
    descriptor.read_only = access.read_only();
    descriptor.capability = property_capability(expose, name, access);

    if descriptor.capability == Some(PropertyCapability::Motion) {
        effects.device_capability = Some(DeviceCapability::MotionSensor);
    }

    if access.is_action() {
        let action = ActionDescriptor {
            title: descriptor.title.clone(),
            description: descriptor.description.clone(),
            input: descriptor,
        };
        Some((Classified::Action(name.to_string(), action), effects))
    } else {
        Some((Classified::Property(descriptor), effects))
    }
}

fn binary_descriptor(expose: &Expose, name: &str) -> PropertyDescriptor {
    let mut descriptor = PropertyDescriptor::new(name, WireType::Boolean);
    descriptor.codec = Codec::OnOff {
        value_on: expose.value_on.cloned().unwrap_or(Value::Bool(true)),
        value_off: expose.value_off.cloned().unwrap_or(Value::Bool(false)),
    };
    descriptor
}

fn numeric_descriptor(expose: &Expose, name: &str, access: Access) -> PropertyDescriptor {
    // Coercion order: a fractional step wins, then the known-float name,
    // everything else stays integer.
    let float = matches!(expose.value_step, Some(step) if step != 1.0)
        || name == "local_temperature";

    if float {
        let mut descriptor = PropertyDescriptor::new(name, WireType::Number);
        descriptor.minimum = expose.value_min;
        descriptor.maximum = expose.value_max;
        descriptor.multiple_of = match expose.value_step {
            Some(step) => Some(step),
            None if !access.read_only() => Some(0.01),
            None => None,
        };
        return descriptor;
    }

    let mut descriptor = PropertyDescriptor::new(name, WireType::Integer);
    descriptor.multiple_of = Some(1.0);

    // Brightness with a declared wire maximum is exposed as a 0-100
    // percentage; the codec keeps the original maximum.
    if name == "brightness"
        && let Some(origin_max) = expose.value_max
    {
        descriptor.minimum = Some(0.0);
        descriptor.maximum = Some(100.0);
        descriptor.unit = Some("percent".to_string());
        descriptor.codec = Codec::ScaledPercentage { origin_max };
    } else {
        descriptor.minimum = expose.value_min;
        descriptor.maximum = expose.value_max;
    }

    descriptor
}

fn enum_descriptor(
    expose: &Expose,
    name: &str,
    access: Access,
    known_names: &mut Vec<String>,
    effects: &mut ClassifySideEffects,
) -> PropertyDescriptor {
    let values: Vec<String> = expose
        .values
        .iter()
        .flatten()
        .map(|v| v.to_string())
        .collect();

    // An `action` enum also declares the device's event vocabulary.
    if name == "action" {
        effects.events = values
            .iter()
            .map(|v| {
                (
                    v.clone(),
                    EventDescriptor {
                        title: derive_title(v),
                    },
                )
            })
            .collect();
    }

    if access == Access::STATE && !known_names.iter().any(|n| n == "power state") {
        let has_on = values.iter().any(|v| v.eq_ignore_ascii_case("on"));
        let has_off = values.iter().any(|v| v.eq_ignore_ascii_case("off"));
        if has_on && has_off && values.len() == 2 {
            let mut synthetic = PropertyDescriptor::new("power state", WireType::Boolean);
            synthetic.read_only = true;
            effects.synthetic_property = Some(synthetic);
            effects.device_capability = Some(DeviceCapability::PushButton);
            known_names.push("power state".to_string());
        }
    }

    let mut descriptor = PropertyDescriptor::new(name, WireType::String);
    descriptor.enum_values = Some(values);
    descriptor
}

/// Semantic tagging by exact or suffix name match, evaluated in priority
/// order; at most one tag applies. A LOCK/UNLOCK on-value overrides the
/// name-derived tag.
fn property_capability(
    expose: &Expose,
    name: &str,
    access: Access,
) -> Option<PropertyCapability> {
    if let Some(on) = expose.value_on.and_then(Value::as_str)
        && (on == "LOCK" || on == "UNLOCK")
    {
        return Some(PropertyCapability::Locked);
    }

    if name.ends_with("state") {
        return Some(if access == Access::STATE {
            PropertyCapability::Pushed
        } else {
            PropertyCapability::OnOff
        });
    }
    if name.ends_with("brightness") {
        return Some(PropertyCapability::Brightness);
    }
    match name {
        "color_temp" => Some(PropertyCapability::ColorTemperature),
        "color_xy" | "color_hs" => Some(PropertyCapability::Color),
        "occupied_heating_setpoint" | "occupied_cooling_setpoint" => {
            Some(PropertyCapability::TargetTemperature)
        }
        "local_temperature" => Some(PropertyCapability::Temperature),
        "occupancy" => Some(PropertyCapability::Motion),
        _ => None,
    }
}

/// The composite color expose is not walked field-by-field; it collapses to
/// one writable text property carrying hex color.
pub fn synthetic_color_property() -> PropertyDescriptor {
    let mut descriptor = PropertyDescriptor::new("color", WireType::String);
    descriptor.read_only = Access::from_bits_truncate(7).read_only();
    descriptor.capability = Some(PropertyCapability::Color);
    descriptor.codec = Codec::ColorHex;
    descriptor
}
