use serde::Deserialize;

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "fado".to_string()
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}

/// Configuration for the MQTT platform
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// MQTT broker hostname or IP address
    pub broker: String,

    /// MQTT broker port
    #[serde(default = "default_port")]
    pub port: u16,

    /// MQTT client ID
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Discovery prefix for Zigbee2MQTT (default: "homeassistant")
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,

    /// Optional username for authentication
    #[serde(default)]
    pub username: Option<String>,

    /// Optional password for authentication
    #[serde(default)]
    pub password: Option<String>,
}
