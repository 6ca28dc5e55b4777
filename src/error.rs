use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum BridgeError {
    #[error("Value conversion failed: {0}")]
    Conversion(String),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Unknown property: {0}")]
    UnknownProperty(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Property is read-only: {0}")]
    ReadOnlyProperty(String),

    #[error("Engine is not running")]
    EngineUnavailable,

    #[error("MQTT client error: {0}")]
    MqttClient(#[from] rumqttc::ClientError),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
