//! Vendor capability schema ("exposes") handling.
//!
//! zigbee2mqtt publishes a recursively-nested, partially standardized
//! capability tree per device. Nodes are kept as raw JSON and inspected
//! through the best-effort [`Expose`] view; malformed nodes are skipped,
//! never fatal.

pub mod walker;

use bitflags::bitflags;
use serde_json::Value;

bitflags! {
    /// How a characteristic can be observed or controlled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Access: u8 {
        /// Value is published by the device.
        const STATE = 1;
        /// Value can be commanded.
        const SET = 2;
        /// Value can be actively polled.
        const GET = 4;
    }
}

impl Access {
    /// A leaf whose access is exactly SET is synthesized as an action.
    pub fn is_action(self) -> bool {
        self == Access::SET
    }

    /// Read-only unless the access includes SET or equals STATE|SET|GET.
    ///
    /// The full-mask comparison is spelled out on purpose; see DESIGN.md.
    pub fn read_only(self) -> bool {
        !(self.contains(Access::SET) || self.bits() == 7)
    }
}

/// Borrowed, typed view over one schema node. Every field is optional; a
/// node that is not a JSON object has no view at all.
#[derive(Debug, Clone, Default)]
pub struct Expose<'a> {
    pub kind: Option<&'a str>,
    pub name: Option<&'a str>,
    pub property: Option<&'a str>,
    pub description: Option<&'a str>,
    pub unit: Option<&'a str>,
    pub access: Option<Access>,
    pub value_min: Option<f64>,
    pub value_max: Option<f64>,
    pub value_step: Option<f64>,
    pub value_on: Option<&'a Value>,
    pub value_off: Option<&'a Value>,
    pub values: Option<Vec<&'a str>>,
    pub has_features: bool,
}

impl<'a> Expose<'a> {
    pub fn from_value(node: &'a Value) -> Option<Self> {
        let obj = node.as_object()?;

        let str_field = |key: &str| obj.get(key).and_then(Value::as_str);
        let num_field = |key: &str| obj.get(key).and_then(Value::as_f64);

        Some(Self {
            kind: str_field("type"),
            name: str_field("name"),
            property: str_field("property"),
            description: str_field("description"),
            unit: str_field("unit"),
            access: obj
                .get("access")
                .and_then(Value::as_u64)
                .map(|bits| Access::from_bits_truncate(bits as u8)),
            value_min: num_field("value_min"),
            value_max: num_field("value_max"),
            value_step: num_field("value_step"),
            value_on: obj.get("value_on"),
            value_off: obj.get("value_off"),
            values: obj.get("values").and_then(Value::as_array).map(|items| {
                items.iter().filter_map(Value::as_str).collect()
            }),
            has_features: obj.get("features").is_some(),
        })
    }

    /// Color sub-components are fragments of a composite, never standalone
    /// properties.
    pub fn is_color_fragment(&self) -> bool {
        matches!(self.name, Some("x") | Some("y"))
    }
}
