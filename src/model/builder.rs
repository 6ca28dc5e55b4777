//! Assembles a [`DeviceModel`] from a device's capability schema.

use super::classify::{Classified, classify_leaf, synthetic_color_property};
use super::{DeviceCapability, DeviceModel};
use crate::schema::{Expose, walker};
use log::debug;
use serde_json::Value;

/// Two-phase model synthesis: a walker pre-pass collects the property-name
/// set, then recursive classification fills in tags, properties, actions
/// and synthetic additions. Malformed sub-trees are skipped; a partially
/// populated model is an acceptable result.
pub struct DeviceModelBuilder {
    known_names: Vec<String>,
    model: DeviceModel,
}

impl DeviceModelBuilder {
    /// Build the model for one device from its `exposes` list.
    pub fn build(exposes: &[Value]) -> DeviceModel {
        let mut known_names = Vec::new();
        for expose in exposes {
            walker::merge_names(&mut known_names, walker::collect_property_names(expose));
        }

        let mut builder = Self {
            known_names,
            model: DeviceModel::default(),
        };
        for expose in exposes {
            builder.visit(expose);
        }
        builder.model
    }

    fn visit(&mut self, node: &Value) {
        let Some(expose) = Expose::from_value(node) else {
            debug!("Skipping non-object schema node");
            return;
        };

        // Device-level semantics for grouping nodes.
        if expose.has_features
            && let Some(kind) = expose.kind
        {
            match kind {
                // The composite color group collapses into a single hex
                // property; its x/y/hue/sat fragments are never walked.
                "composite" if expose.property == Some("color") => {
                    self.model.add_capability(DeviceCapability::ColorControl);
                    self.model.add_property(synthetic_color_property());
                    return;
                }
                "light" => self.model.add_capability(DeviceCapability::Light),
                "switch" => self.model.add_capability(DeviceCapability::OnOffSwitch),
                "lock" => self.model.add_capability(DeviceCapability::Lock),
                "climate" => self.model.add_capability(DeviceCapability::Thermostat),
                _ => {}
            }
        }

        // Leaf classification.
        if expose.access.is_some()
            && expose.name.is_some()
            && !expose.is_color_fragment()
        {
            self.classify(&expose);
        }

        // Recurse into the remaining structure; a `values` list is enum
        // data, not a sub-schema.
        let Some(obj) = node.as_object() else { return };
        for (key, child) in obj {
            if key == "values" {
                continue;
            }
            match child {
                Value::Object(_) => self.visit(child),
                Value::Array(items) => {
                    for item in items {
                        if item.is_object() {
                            self.visit(item);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn classify(&mut self, expose: &Expose) {
        let Some((classified, effects)) = classify_leaf(expose, &mut self.known_names) else {
            return;
        };

        match classified {
            Classified::Property(descriptor) => self.model.add_property(descriptor),
            Classified::Action(name, action) => {
                self.model.actions.entry(name).or_insert(action);
            }
        }

        if let Some(capability) = effects.device_capability {
            self.model.add_capability(capability);
        }
        if let Some(synthetic) = effects.synthetic_property {
            self.model.add_property(synthetic);
        }
        for (name, event) in effects.events {
            self.model.events.entry(name).or_insert(event);
        }
    }
}
