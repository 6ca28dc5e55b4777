//! z2m device bridge library.
//!
//! Synthesizes a structured smart-device model from the capability schemas
//! a zigbee2mqtt bridge publishes, and keeps that model live by translating
//! bus telemetry into model mutations with lifecycle tracking.

pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod mqtt;
pub mod schema;
pub mod transform;
