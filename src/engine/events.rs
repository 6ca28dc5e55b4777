//! Change notifications emitted to the platform collaborator.

use crate::engine::lifecycle::FirmwareUpdateState;
use crate::model::{DeviceModel, PropertyDescriptor};
use serde_json::Value;

/// One model mutation or lifecycle transition, in the order it happened.
#[derive(Debug, Clone)]
pub enum ModelEvent {
    /// A device's schema arrived and its model was built.
    DeviceAdded { id: String, model: DeviceModel },
    /// A property value changed.
    PropertyChanged {
        id: String,
        name: String,
        value: Value,
    },
    /// An unmodeled wire key grew a descriptor on the fly.
    PropertyVivified {
        id: String,
        descriptor: PropertyDescriptor,
    },
    /// Availability transition.
    ConnectivityChanged { id: String, connected: bool },
    /// A declared device event fired (button press and the like).
    DeviceEvent {
        id: String,
        name: String,
        data: Option<Value>,
    },
    /// The fleet-wide firmware update machine moved.
    FirmwareUpdateChanged {
        state: FirmwareUpdateState,
        device_id: Option<String>,
    },
    /// A fresh network-map snapshot is available.
    NetworkMapReady { graph: String },
}

/// Outcome of a user-initiated firmware update request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareUpdateReply {
    /// Request accepted and forwarded to the bridge.
    Started,
    /// Another update is in flight across the fleet; try again later.
    PleaseWait,
    /// No such device.
    UnknownDevice,
}
