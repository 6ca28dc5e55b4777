//! Stateless value conversions applied while ingesting wire payloads.

pub mod color;

use log::warn;
use serde_json::{Map, Value};

/// Scale a raw wire value into a 0-100 percentage.
///
/// `origin_max` is the wire-side maximum the device declared in its schema.
pub fn integer_to_percentage(raw: f64, origin_max: f64) -> i64 {
    (raw / (origin_max / 100.0)).floor() as i64
}

/// Scale a 0-100 percentage back into raw wire units, clamped to the wire
/// maximum. Clamping indicates an out-of-range command and is logged.
pub fn percentage_to_integer(percentage: f64, origin_max: f64) -> i64 {
    let raw = (percentage * (origin_max / 100.0)).floor() as i64;
    let max = origin_max as i64;
    if raw > max {
        warn!(
            "Percentage {} overflows wire range 0-{}, clamping",
            percentage, max
        );
        return max;
    }
    raw
}

/// Derived boolean extraction: a payload carrying `action: "on"|"off"`
/// (case-insensitive) without a `state` key mirrors the boolean onto the
/// synthetic `power state` property.
///
/// Returns the mirrored value, or `None` when the payload does not qualify.
pub fn mirrored_power_state(payload: &Map<String, Value>) -> Option<bool> {
    if payload.contains_key("state") {
        return None;
    }
    let action = payload.get("action")?.as_str()?;
    match action.to_ascii_lowercase().as_str() {
        "on" => Some(true),
        "off" => Some(false),
        _ => None,
    }
}
