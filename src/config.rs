use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Load environment variables from .env file with robust parsing.
/// Handles values with spaces without requiring quotes.
pub fn load_dotenv() {
    let env_path = Path::new(".env");
    if !env_path.exists() {
        return;
    }

    let content = match fs::read_to_string(env_path) {
        Ok(c) => c,
        Err(_) => return,
    };

    for line in content.lines() {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // Find the first '=' and split there
        if let Some(eq_pos) = line.find('=') {
            let key = line[..eq_pos].trim();
            let mut value = line[eq_pos + 1..].trim();

            // Remove surrounding quotes if present
            if (value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\''))
            {
                value = &value[1..value.len() - 1];
            }

            // Only set if not already set (env vars take precedence)
            if std::env::var(key).is_err() {
                // SAFETY: We're single-threaded at this point (called before any async runtime)
                unsafe { std::env::set_var(key, value) };
            }
        }
    }
}

/// What to do with a device's model when the bridge reports it offline.
///
/// The effects are independent: `Both` applies the forced state toggle and
/// the connectivity change.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum OfflinePolicy {
    /// Force the `state` property to `false` and notify.
    ToggleOff,
    /// Mark the device disconnected and notify.
    Disconnected,
    /// Both of the above.
    Both,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Tunables for the device sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Topic prefix the zigbee2mqtt bridge publishes under.
    pub topic_prefix: String,
    /// Availability messages arriving this soon after startup are discarded.
    pub availability_grace_secs: u64,
    /// Response to an "offline" availability message.
    pub offline_policy: OfflinePolicy,
    /// Stale-lock watchdog: a firmware update with no terminal signal within
    /// this window is forced back to idle.
    pub firmware_watchdog_secs: u64,
    /// Minimum spacing between accepted network-map requests.
    pub map_cooldown_secs: u64,
    /// Delay between modeling a new device and the initial state read.
    pub settle_delay_ms: u64,
    /// Optional payload field copied into emitted device events.
    pub event_data_field: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig {
                broker_host: "127.0.0.1".to_string(),
                broker_port: 1883,
                client_id: "z2m-device-bridge".to_string(),
                username: None,
                password: None,
            },
            engine: EngineConfig {
                topic_prefix: "zigbee2mqtt".to_string(),
                availability_grace_secs: 10,
                offline_policy: OfflinePolicy::Disconnected,
                firmware_watchdog_secs: 120,
                map_cooldown_secs: 60,
                settle_delay_ms: 1000,
                event_data_field: None,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // MQTT configuration
        if let Ok(host) = std::env::var("MQTT_BROKER_HOST") {
            config.mqtt.broker_host = host;
        }
        if let Ok(port) = std::env::var("MQTT_BROKER_PORT")
            && let Ok(p) = port.parse()
        {
            config.mqtt.broker_port = p;
        }
        if let Ok(client_id) = std::env::var("MQTT_CLIENT_ID") {
            config.mqtt.client_id = client_id;
        }
        if let Ok(username) = std::env::var("MQTT_USERNAME") {
            config.mqtt.username = Some(username);
        }
        if let Ok(password) = std::env::var("MQTT_PASSWORD") {
            config.mqtt.password = Some(password);
        }

        // Engine configuration
        if let Ok(prefix) = std::env::var("Z2M_TOPIC_PREFIX") {
            config.engine.topic_prefix = prefix;
        }
        if let Ok(grace) = std::env::var("Z2M_AVAILABILITY_GRACE_SECS")
            && let Ok(g) = grace.parse()
        {
            config.engine.availability_grace_secs = g;
        }
        if let Ok(policy) = std::env::var("Z2M_OFFLINE_POLICY")
            && let Ok(p) = policy.parse()
        {
            config.engine.offline_policy = p;
        }
        if let Ok(watchdog) = std::env::var("Z2M_FIRMWARE_WATCHDOG_SECS")
            && let Ok(w) = watchdog.parse()
        {
            config.engine.firmware_watchdog_secs = w;
        }
        if let Ok(cooldown) = std::env::var("Z2M_MAP_COOLDOWN_SECS")
            && let Ok(c) = cooldown.parse()
        {
            config.engine.map_cooldown_secs = c;
        }
        if let Ok(settle) = std::env::var("Z2M_SETTLE_DELAY_MS")
            && let Ok(s) = settle.parse()
        {
            config.engine.settle_delay_ms = s;
        }
        if let Ok(field) = std::env::var("Z2M_EVENT_DATA_FIELD") {
            config.engine.event_data_field = Some(field);
        }

        config
    }
}
