//! Routing of prefix-relative zigbee2mqtt topics.

/// Where an inbound topic should be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutedTopic<'a> {
    /// `bridge/devices`: the fleet's device descriptors and schemas.
    BridgeDevices,
    /// `bridge/response/networkmap`: a network-map snapshot.
    NetworkMapResponse,
    /// `bridge/response/device/ota_update/update`: a firmware-update result.
    OtaUpdateResponse,
    /// `<name>/availability`: online/offline transitions.
    DeviceAvailability(&'a str),
    /// `<name>`: telemetry payload for one device.
    DeviceMessage(&'a str),
    /// Anything else, including echoes of our own `/set` and `/get`.
    Ignored,
}

/// Route a raw topic under the configured prefix. Topics outside the
/// prefix, bridge chatter we do not consume, and our own command echoes
/// all land in [`RoutedTopic::Ignored`].
pub fn route<'a>(prefix: &str, topic: &'a str) -> RoutedTopic<'a> {
    let Some(relative) = topic
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
    else {
        return RoutedTopic::Ignored;
    };

    if let Some(bridge_topic) = relative.strip_prefix("bridge/") {
        return match bridge_topic {
            "devices" => RoutedTopic::BridgeDevices,
            "response/networkmap" => RoutedTopic::NetworkMapResponse,
            "response/device/ota_update/update" => RoutedTopic::OtaUpdateResponse,
            _ => RoutedTopic::Ignored,
        };
    }

    match relative.split_once('/') {
        None if !relative.is_empty() => RoutedTopic::DeviceMessage(relative),
        Some((name, "availability")) if !name.is_empty() => {
            RoutedTopic::DeviceAvailability(name)
        }
        _ => RoutedTopic::Ignored,
    }
}

/// Topic for commanding a device.
pub fn set_topic(prefix: &str, friendly_name: &str) -> String {
    format!("{prefix}/{friendly_name}/set")
}

/// Topic for requesting a state read from a device.
pub fn get_topic(prefix: &str, friendly_name: &str) -> String {
    format!("{prefix}/{friendly_name}/get")
}

/// Topic for requesting a network-map snapshot.
pub fn network_map_request_topic(prefix: &str) -> String {
    format!("{prefix}/bridge/request/networkmap")
}

/// Topic for starting a firmware update.
pub fn ota_update_request_topic(prefix: &str) -> String {
    format!("{prefix}/bridge/request/device/ota_update/update")
}

/// Topic for removing a device from the fleet.
pub fn device_remove_request_topic(prefix: &str) -> String {
    format!("{prefix}/bridge/request/device/remove")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_topics() {
        assert_eq!(
            route("zigbee2mqtt", "zigbee2mqtt/bridge/devices"),
            RoutedTopic::BridgeDevices
        );
        assert_eq!(
            route("zigbee2mqtt", "zigbee2mqtt/bridge/response/networkmap"),
            RoutedTopic::NetworkMapResponse
        );
        assert_eq!(
            route(
                "zigbee2mqtt",
                "zigbee2mqtt/bridge/response/device/ota_update/update"
            ),
            RoutedTopic::OtaUpdateResponse
        );
        assert_eq!(
            route("zigbee2mqtt", "zigbee2mqtt/bridge/logging"),
            RoutedTopic::Ignored
        );
    }

    #[test]
    fn test_device_topics() {
        assert_eq!(
            route("zigbee2mqtt", "zigbee2mqtt/kitchen-light"),
            RoutedTopic::DeviceMessage("kitchen-light")
        );
        assert_eq!(
            route("zigbee2mqtt", "zigbee2mqtt/kitchen-light/availability"),
            RoutedTopic::DeviceAvailability("kitchen-light")
        );
    }

    #[test]
    fn test_command_echoes_are_ignored() {
        assert_eq!(
            route("zigbee2mqtt", "zigbee2mqtt/kitchen-light/set"),
            RoutedTopic::Ignored
        );
        assert_eq!(
            route("zigbee2mqtt", "zigbee2mqtt/kitchen-light/get"),
            RoutedTopic::Ignored
        );
    }

    #[test]
    fn test_foreign_topics_are_ignored() {
        assert_eq!(route("zigbee2mqtt", "homeassistant/status"), RoutedTopic::Ignored);
        assert_eq!(route("zigbee2mqtt", "zigbee2mqtt"), RoutedTopic::Ignored);
        assert_eq!(
            route("zigbee2mqtt", "zigbee2mqtt-other/device"),
            RoutedTopic::Ignored
        );
    }

    #[test]
    fn test_custom_prefix() {
        assert_eq!(
            route("z2m/first-floor", "z2m/first-floor/hall-sensor"),
            RoutedTopic::DeviceMessage("hall-sensor")
        );
    }

    #[test]
    fn test_outbound_topic_builders() {
        assert_eq!(
            set_topic("zigbee2mqtt", "kitchen-light"),
            "zigbee2mqtt/kitchen-light/set"
        );
        assert_eq!(
            get_topic("zigbee2mqtt", "kitchen-light"),
            "zigbee2mqtt/kitchen-light/get"
        );
        assert_eq!(
            network_map_request_topic("zigbee2mqtt"),
            "zigbee2mqtt/bridge/request/networkmap"
        );
        assert_eq!(
            ota_update_request_topic("zigbee2mqtt"),
            "zigbee2mqtt/bridge/request/device/ota_update/update"
        );
        assert_eq!(
            device_remove_request_topic("zigbee2mqtt"),
            "zigbee2mqtt/bridge/request/device/remove"
        );
    }
}
