use serde::Deserialize;
use serde::Serialize;

/// Deserialize a field that can be either a string or an integer.
///
/// Zigbee2MQTT sends version fields like `hw_version` as integers, but the
/// Home Assistant discovery schema defines them as strings.
fn deserialize_string_or_int<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de;

    struct StringOrInt;

    impl<'de> de::Visitor<'de> for StringOrInt {
        type Value = Option<String>;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("string, integer, or null")
        }

        fn visit_none<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_string<E>(self, v: String) -> Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }
    }

    deserializer.deserialize_any(StringOrInt)
}

/// Light discovery message, JSON schema.
///
/// The payload Zigbee2MQTT publishes on `<prefix>/light/<node>/<object>/config`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DiscoveryMessage {
    /// Human-readable name of the entity
    pub name: Option<String>,

    /// Unique identifier for this entity
    pub unique_id: Option<String>,

    /// Topic to receive state updates
    pub state_topic: Option<String>,

    /// Topic to send commands
    pub command_topic: Option<String>,

    /// Device information
    pub device: Option<DeviceInfo>,

    /// Schema type; only "json" lights can be faded
    pub schema: Option<String>,

    /// Whether brightness is supported
    pub brightness: Option<bool>,

    /// Color modes, e.g. `["xy", "color_temp"]`
    pub supported_color_modes: Option<Vec<String>>,

    /// Legacy capability flags, used when `supported_color_modes` is absent
    pub color_temp: Option<bool>,
    pub hs: Option<bool>,
    pub xy: Option<bool>,

    pub min_mireds: Option<u16>,
    pub max_mireds: Option<u16>,
}

/// Device information from Zigbee2MQTT discovery
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceInfo {
    /// List of identifiers for this device
    #[serde(default)]
    pub identifiers: Vec<String>,

    pub name: String,

    pub manufacturer: Option<String>,

    pub model: Option<String>,

    /// Software version (can be string or integer in Zigbee2MQTT)
    #[serde(default, deserialize_with = "deserialize_string_or_int")]
    pub sw_version: Option<String>,

    /// Hardware version (can be string or integer in Zigbee2MQTT)
    #[serde(default, deserialize_with = "deserialize_string_or_int")]
    pub hw_version: Option<String>,
}

/// Parse a discovery topic to extract component type, node_id, and object_id
///
/// Topic format: {prefix}/{component}/{node_id}/{object_id}/config
/// Example: homeassistant/light/0x00124b001234abcd/light/config
///
/// Returns: (component, node_id, object_id)
pub fn parse_discovery_topic(topic: &str, prefix: &str) -> Option<(String, String, String)> {
    let without_prefix = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    let parts: Vec<&str> = without_prefix.split('/').collect();

    // We expect at least 4 parts: component/node_id/object_id/config
    if parts.len() < 4 || parts.last() != Some(&"config") {
        return None;
    }

    let component = parts[0].to_string();
    let node_id = parts[1].to_string();
    let object_id = parts[2].to_string();

    Some((component, node_id, object_id))
}
