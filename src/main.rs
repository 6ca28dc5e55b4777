// The binary shares the library's modules; not every public surface is
// exercised from main.
#![allow(dead_code)]

mod bridge;
mod config;
mod engine;
mod error;
mod model;
mod mqtt;
mod schema;
mod transform;

use crate::bridge::BridgeService;
use crate::config::{Config, OfflinePolicy};
use crate::engine::ModelEvent;
use clap::Parser;
use log::{debug, error, info};
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "z2m-device-bridge")]
#[command(about = "Bridges zigbee2mqtt devices into a generic smart-device model")]
struct Args {
    /// MQTT broker host
    #[arg(long, env = "MQTT_BROKER_HOST")]
    broker_host: Option<String>,

    /// MQTT broker port
    #[arg(long, env = "MQTT_BROKER_PORT")]
    broker_port: Option<u16>,

    /// Topic prefix the zigbee2mqtt bridge publishes under
    #[arg(long, env = "Z2M_TOPIC_PREFIX")]
    topic_prefix: Option<String>,

    /// Response to an "offline" availability report
    #[arg(long, value_enum, env = "Z2M_OFFLINE_POLICY")]
    offline_policy: Option<OfflinePolicy>,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() {
    // Load .env file before anything else
    config::load_dotenv();
    init_logger();

    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(host) = args.broker_host {
        config.mqtt.broker_host = host;
    }
    if let Some(port) = args.broker_port {
        config.mqtt.broker_port = port;
    }
    if let Some(prefix) = args.topic_prefix {
        config.engine.topic_prefix = prefix;
    }
    if let Some(policy) = args.offline_policy {
        config.engine.offline_policy = policy;
    }

    info!("Starting z2m device bridge");
    info!("  Broker: {}:{}", config.mqtt.broker_host, config.mqtt.broker_port);
    info!("  Topic prefix: {}", config.engine.topic_prefix);
    info!("  Offline policy: {}", config.engine.offline_policy);

    let (handle, mut events, service_task) = BridgeService::new(config).start();
    // Kept alive for embedders; the standalone binary only consumes events.
    let _handle = handle;

    let event_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ModelEvent::DeviceAdded { id, model } => {
                    info!(
                        "Device added: {} ({} properties, {} actions)",
                        id,
                        model.properties.len(),
                        model.actions.len()
                    );
                }
                ModelEvent::PropertyChanged { id, name, value } => {
                    debug!("{}: {} = {}", id, name, value);
                }
                ModelEvent::PropertyVivified { id, descriptor } => {
                    debug!("{}: grew property {}", id, descriptor.name);
                }
                ModelEvent::ConnectivityChanged { id, connected } => {
                    info!(
                        "{} is now {}",
                        id,
                        if connected { "connected" } else { "disconnected" }
                    );
                }
                ModelEvent::DeviceEvent { id, name, .. } => {
                    info!("{} event: {}", id, name);
                }
                ModelEvent::FirmwareUpdateChanged { state, device_id } => {
                    info!("Firmware update {:?}: {}", device_id, state);
                }
                ModelEvent::NetworkMapReady { graph } => {
                    info!("Network map updated ({} bytes)", graph.len());
                }
            }
        }
    });

    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    event_task.abort();
    service_task.abort();
}
