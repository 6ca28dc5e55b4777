//! MQTT plumbing: the broker client wrapper and topic routing.

pub mod client;
pub mod topics;

pub use client::{MqttClient, MqttMessage, OutboundMessage};
pub use topics::RoutedTopic;
