use serde::Deserialize;
use serde_json::json;
use serde_json::Map;
use serde_json::Value;

use crate::color::xy_to_hs;
use crate::color::Hs;
use crate::engine::Capabilities;
use crate::engine::ColorMode;
use crate::engine::LightColor;
use crate::engine::LightCommand;
use crate::engine::LightSnapshot;
use crate::engine::LightState;
use crate::integrations::mqtt::discovery::DiscoveryMessage;

/// Light entity
#[derive(Debug, Clone)]
pub struct Light {
    /// Entity ID (e.g., "light.living_room")
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Current state of the light
    pub state: LightState,

    /// Set once the first state message has arrived
    pub has_state: bool,

    pub capabilities: Capabilities,

    /// Topic to receive state updates
    pub state_topic: String,

    /// Topic to send commands
    pub command_topic: String,
}

/// Zigbee2MQTT state payload. Missing fields keep their previous value.
#[derive(Debug, Default, Deserialize)]
struct StatePayload {
    state: Option<String>,
    brightness: Option<u16>,
    color_mode: Option<String>,
    color: Option<ColorPayload>,
    color_temp: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct ColorPayload {
    hue: Option<f64>,
    saturation: Option<f64>,
    x: Option<f64>,
    y: Option<f64>,
}

impl ColorPayload {
    fn hs(&self) -> Option<Hs> {
        match (self.hue, self.saturation, self.x, self.y) {
            (Some(hue), Some(saturation), _, _) => Some(Hs::new(hue, saturation)),
            (_, _, Some(x), Some(y)) => Some(xy_to_hs(x, y)),
            _ => None,
        }
    }
}

fn capabilities(discovery: &DiscoveryMessage) -> Capabilities {
    let mut modes: Vec<ColorMode> = discovery
        .supported_color_modes
        .iter()
        .flatten()
        .filter_map(|mode| mode.parse().ok())
        .collect();

    if modes.is_empty() {
        let legacy = [
            (discovery.color_temp, ColorMode::ColorTemp),
            (discovery.hs, ColorMode::Hs),
            (discovery.xy, ColorMode::Xy),
            (discovery.brightness, ColorMode::Brightness),
        ];
        modes.extend(
            legacy
                .into_iter()
                .filter(|(flag, _)| *flag == Some(true))
                .map(|(_, mode)| mode),
        );
    }
    if modes.is_empty() {
        modes.push(ColorMode::OnOff);
    }

    let mut caps = Capabilities::new(modes);
    if caps.supports_color_temp() {
        caps.min_mireds = discovery.min_mireds;
        caps.max_mireds = discovery.max_mireds;
    }
    caps
}

impl Light {
    /// Create a Light entity from a Zigbee2MQTT discovery message
    pub fn from_discovery(
        discovery: DiscoveryMessage,
        id: String,
        node_id: &str,
    ) -> Result<Self, String> {
        if let Some(schema) = discovery.schema.as_deref().filter(|s| *s != "json") {
            return Err(format!("unsupported light schema {schema:?}"));
        }

        let capabilities = capabilities(&discovery);

        let name = discovery
            .name
            .or_else(|| discovery.device.as_ref().map(|d| d.name.clone()))
            .unwrap_or_else(|| format!("Light {}", node_id));

        let state_topic = discovery
            .state_topic
            .ok_or("Missing state_topic in discovery message")?;

        let command_topic = discovery
            .command_topic
            .ok_or("Missing command_topic in discovery message")?;

        Ok(Self {
            id,
            name,
            state: LightState::default(),
            has_state: false,
            capabilities,
            state_topic,
            command_topic,
        })
    }

    pub fn snapshot(&self) -> LightSnapshot {
        LightSnapshot {
            state: self.state.clone(),
            capabilities: self.capabilities.clone(),
        }
    }

    /// Update the light state from an MQTT payload
    ///
    /// Zigbee2MQTT sends state updates as JSON, e.g.:
    /// {"state": "ON", "brightness": 128, "color_mode": "color_temp", "color_temp": 370}
    pub fn update_state(&mut self, payload: &[u8]) -> Result<(), serde_json::Error> {
        let update: StatePayload = serde_json::from_slice(payload)?;
        self.has_state = true;

        if let Some(state) = &update.state {
            self.state.on = state.eq_ignore_ascii_case("ON");
        }

        if !self.capabilities.supports_brightness() {
            // On/off lights are either fully on or off.
            self.state.brightness = self.state.on.then_some(255);
        } else if let Some(brightness) = update.brightness {
            self.state.brightness = Some(brightness.min(255) as u8);
        }

        let hs = update.color.as_ref().and_then(ColorPayload::hs);
        let color = match update.color_mode.as_deref() {
            Some("color_temp") => update.color_temp.map(LightColor::ColorTemp),
            Some(_) => hs.map(LightColor::Hs),
            None => hs
                .map(LightColor::Hs)
                .or(update.color_temp.map(LightColor::ColorTemp)),
        };
        if color.is_some() {
            self.state.color = color;
        }

        Ok(())
    }

    /// Generate a command payload for `command`.
    ///
    /// Fails with `UnsupportedCapability` when the command drives a
    /// dimension this light does not have.
    pub fn command_payload(&self, command: &LightCommand) -> crate::Result<Vec<u8>> {
        let unsupported = |capability: &str| crate::Error::UnsupportedCapability {
            light_id: self.id.clone(),
            capability: capability.to_string(),
        };

        let mut payload = Map::new();
        payload.insert(
            "state".to_string(),
            json!(if command.on { "ON" } else { "OFF" }),
        );

        if command.on {
            if let Some(brightness) = command.brightness {
                if !self.capabilities.supports_brightness() {
                    return Err(unsupported("brightness"));
                }
                payload.insert("brightness".to_string(), json!(brightness));
            }

            match command.color {
                Some(LightColor::Hs(hs)) => {
                    if !self.capabilities.supports_hs() {
                        return Err(unsupported("hs_color"));
                    }
                    payload.insert(
                        "color".to_string(),
                        json!({ "hue": hs.hue, "saturation": hs.saturation }),
                    );
                }
                Some(LightColor::ColorTemp(mireds)) => {
                    if !self.capabilities.supports_color_temp() {
                        return Err(unsupported("color_temp"));
                    }
                    payload.insert("color_temp".to_string(), json!(mireds));
                }
                None => {}
            }
        }

        if let Some(ms) = command.transition_ms {
            payload.insert(
                "transition".to_string(),
                json!(f64::from(ms) / 1000.0),
            );
        }

        serde_json::to_vec(&Value::Object(payload)).map_err(|e| crate::Error::DeviceUnavailable {
            light_id: self.id.clone(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discovery(modes: &[&str]) -> DiscoveryMessage {
        DiscoveryMessage {
            name: Some("Test Light".to_string()),
            unique_id: Some("test_light".to_string()),
            state_topic: Some("zigbee2mqtt/light".to_string()),
            command_topic: Some("zigbee2mqtt/light/set".to_string()),
            schema: Some("json".to_string()),
            brightness: Some(true),
            supported_color_modes: Some(modes.iter().map(|m| m.to_string()).collect()),
            min_mireds: Some(153),
            max_mireds: Some(500),
            ..Default::default()
        }
    }

    fn light(modes: &[&str]) -> Light {
        Light::from_discovery(discovery(modes), "light.test".to_string(), "test_node").unwrap()
    }

    fn payload(light: &Light, command: LightCommand) -> String {
        String::from_utf8(light.command_payload(&command).unwrap()).unwrap()
    }

    #[test]
    fn test_capabilities_from_discovery() {
        let caps = light(&["xy", "color_temp"]).capabilities;
        assert!(caps.supports_hs());
        assert!(caps.supports_color_temp());
        assert_eq!(caps.min_mireds, Some(153));

        let dimmer = light(&["brightness"]).capabilities;
        assert!(dimmer.supports_brightness());
        assert!(!dimmer.supports_hs());
        assert_eq!(dimmer.max_mireds, None);

        let mut legacy = discovery(&[]);
        legacy.supported_color_modes = None;
        legacy.brightness = None;
        let caps = Light::from_discovery(legacy, "light.x".to_string(), "x")
            .unwrap()
            .capabilities;
        assert_eq!(caps.color_modes, vec![ColorMode::OnOff]);
    }

    #[test]
    fn test_rejects_non_json_schema() {
        let mut msg = discovery(&["brightness"]);
        msg.schema = Some("template".to_string());
        assert!(Light::from_discovery(msg, "light.x".to_string(), "x").is_err());

        let mut msg = discovery(&["brightness"]);
        msg.state_topic = None;
        assert!(Light::from_discovery(msg, "light.x".to_string(), "x").is_err());
    }

    #[test]
    fn test_update_state() {
        let mut light = light(&["xy", "color_temp"]);
        light
            .update_state(br#"{"state": "ON", "brightness": 128, "color_mode": "color_temp", "color_temp": 370}"#)
            .unwrap();
        assert!(light.has_state);
        assert!(light.state.on);
        assert_eq!(light.state.brightness, Some(128));
        assert_eq!(light.state.color, Some(LightColor::ColorTemp(370)));

        light
            .update_state(br#"{"color_mode": "hs", "color": {"hue": 240, "saturation": 100}}"#)
            .unwrap();
        assert_eq!(light.state.brightness, Some(128));
        assert_eq!(light.state.color, Some(LightColor::Hs(Hs::new(240.0, 100.0))));

        light.update_state(br#"{"state": "OFF"}"#).unwrap();
        assert!(!light.state.on);
    }

    #[test]
    fn test_update_state_from_xy() {
        let mut light = light(&["xy"]);
        light
            .update_state(br#"{"state": "ON", "color_mode": "xy", "color": {"x": 0.3127, "y": 0.329}}"#)
            .unwrap();
        let hs = light.state.hs().unwrap();
        assert!(hs.saturation < 5.0, "D65 white should be unsaturated: {hs}");
    }

    #[test]
    fn test_onoff_light_reports_full_brightness() {
        let mut light = light(&["onoff"]);
        light.update_state(br#"{"state": "ON"}"#).unwrap();
        assert_eq!(light.state.brightness, Some(255));
        light.update_state(br#"{"state": "OFF"}"#).unwrap();
        assert_eq!(light.state.brightness, None);
    }

    #[test]
    fn test_invalid_state_payload() {
        let mut light = light(&["brightness"]);
        assert!(light.update_state(b"not json").is_err());
        assert!(!light.has_state);
    }

    #[test]
    fn test_command_payload() {
        let light = light(&["hs", "color_temp"]);
        insta::assert_snapshot!(
            payload(&light, LightCommand::off()),
            @r#"{"state":"OFF"}"#
        );
        insta::assert_snapshot!(
            payload(&light, LightCommand::to(Some(128), Some(LightColor::ColorTemp(300)))),
            @r#"{"brightness":128,"color_temp":300,"state":"ON"}"#
        );
        insta::assert_snapshot!(
            payload(
                &light,
                LightCommand::to(Some(10), Some(LightColor::Hs(Hs::new(30.0, 50.0))))
                    .with_transition_ms(Some(250))
            ),
            @r#"{"brightness":10,"color":{"hue":30.0,"saturation":50.0},"state":"ON","transition":0.25}"#
        );
    }

    #[test]
    fn test_command_payload_unsupported() {
        let dimmer = light(&["brightness"]);
        let err = dimmer
            .command_payload(&LightCommand::to(None, Some(LightColor::ColorTemp(300))))
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::UnsupportedCapability { ref capability, .. } if capability == "color_temp"
        ));

        let onoff = light(&["onoff"]);
        assert!(onoff.command_payload(&LightCommand::to(Some(10), None)).is_err());
        assert!(onoff.command_payload(&LightCommand::to(None, None)).is_ok());
    }
}
