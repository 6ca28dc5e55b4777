//! Diagnostic binary for poking a live zigbee2mqtt broker.
//!
//! Usage:
//!   cargo run --bin z2m-probe
//!
//! Connects to the broker, models every device the bridge announces, logs
//! property changes and device events as they arrive, and requests one
//! network-map snapshot once the fleet has settled.

use log::{info, warn};
use std::time::Duration;
use z2m_device_bridge::bridge::BridgeService;
use z2m_device_bridge::config::Config;
use z2m_device_bridge::engine::ModelEvent;

#[tokio::main]
async fn main() {
    // Load .env file before anything else
    z2m_device_bridge::config::load_dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting z2m probe");

    let config = Config::from_env();
    info!(
        "Connecting to MQTT broker at {}:{}",
        config.mqtt.broker_host, config.mqtt.broker_port
    );

    let (handle, mut events, service_task) = BridgeService::new(config).start();

    // Give the fleet a moment to announce itself, then ask for a map.
    let map_handle = handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(15)).await;
        match map_handle.network_map().await {
            Ok(graph) => info!("Network map:\n{}", graph),
            Err(e) => warn!("Network map request failed: {}", e),
        }
    });

    let event_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ModelEvent::DeviceAdded { id, model } => {
                    info!(
                        "Modeled {} [{}]",
                        id,
                        model
                            .capabilities
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join(", ")
                    );
                    for (name, property) in &model.properties {
                        info!(
                            "  {} ({:?}{})",
                            name,
                            property.wire_type,
                            if property.read_only { ", read-only" } else { "" }
                        );
                    }
                    for name in model.actions.keys() {
                        info!("  action: {}", name);
                    }
                }
                ModelEvent::PropertyChanged { id, name, value } => {
                    info!("{}: {} = {}", id, name, value);
                }
                ModelEvent::PropertyVivified { id, descriptor } => {
                    info!("{}: auto-vivified {}", id, descriptor.name);
                }
                ModelEvent::ConnectivityChanged { id, connected } => {
                    info!("{}: connected = {}", id, connected);
                }
                ModelEvent::DeviceEvent { id, name, data } => {
                    info!("{}: event {} {:?}", id, name, data);
                }
                ModelEvent::FirmwareUpdateChanged { state, device_id } => {
                    info!("firmware update {:?}: {}", device_id, state);
                }
                ModelEvent::NetworkMapReady { graph } => {
                    info!("Fresh network map:\n{}", graph);
                }
            }
        }
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
    event_task.abort();
    service_task.abort();
}
