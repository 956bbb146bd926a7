use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::sync::PoisonError;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::client::MqttClient;
use super::client::MqttMessage;
use super::client::MqttMessages;
use super::discovery::parse_discovery_topic;
use super::discovery::DiscoveryMessage;
use super::light::Light;
use super::MqttConfig;
use crate::engine::DevicePlatform;
use crate::engine::FromPlatformMessage;
use crate::engine::FromPlatformSender;
use crate::engine::LightCommand;
use crate::engine::LightSnapshot;
use crate::engine::StateChanged;

const PLATFORM_NAME: &str = "mqtt";

/// Type alias for the shared lights map
type LightsMap = Arc<Mutex<HashMap<String, Light>>>;

fn invalid_data(e: impl ToString) -> Box<dyn Error + Send> {
    Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        e.to_string(),
    ))
}

/// MQTT device platform
///
/// Drives Zigbee2MQTT lights discovered through Home Assistant MQTT
/// discovery (JSON schema).
pub struct MqttPlatform<C: MqttClient> {
    client: Arc<C>,
    config: MqttConfig,
    lights: LightsMap,
    /// Handle to the background message processing task
    message_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<C: MqttClient + 'static> MqttPlatform<C> {
    pub fn new(client: C, config: &MqttConfig) -> Self {
        Self {
            client: Arc::new(client),
            config: config.clone(),
            lights: Arc::new(Mutex::new(HashMap::new())),
            message_task: std::sync::Mutex::new(None),
        }
    }

    /// Process incoming MQTT messages until the client goes away.
    async fn process_messages_task(
        mut messages: MqttMessages,
        client: Arc<C>,
        config: MqttConfig,
        lights: LightsMap,
        to_engine: FromPlatformSender,
    ) {
        while let Some(msg) = messages.recv().await {
            trace!(
                "Received message on topic: {} (retained={})",
                msg.topic,
                msg.retain
            );

            if msg.topic.ends_with("/config") {
                if let Err(e) =
                    Self::handle_discovery(&msg, &config, &client, &lights, &to_engine).await
                {
                    warn!("Error handling discovery message: {}", e);
                }
            } else if let Err(e) = Self::handle_state_update(&msg, &lights, &to_engine).await {
                warn!("Error handling state update on {}: {}", msg.topic, e);
            }
        }
        info!("MQTT message stream closed");
    }

    async fn handle_discovery(
        msg: &MqttMessage,
        config: &MqttConfig,
        client: &Arc<C>,
        lights: &LightsMap,
        to_engine: &FromPlatformSender,
    ) -> Result<(), Box<dyn Error + Send>> {
        let (component, node_id, object_id) =
            parse_discovery_topic(&msg.topic, &config.discovery_prefix)
                .ok_or_else(|| invalid_data("Failed to parse discovery topic"))?;

        debug!(
            "Discovery: component={}, node_id={}, object_id={}",
            component, node_id, object_id
        );

        if component != "light" {
            debug!("Ignoring unsupported component: {}", component);
            return Ok(());
        }

        let light_id = format!("light.{}", node_id);

        if msg.payload.is_empty() {
            let removed = lights.lock().await.remove(&light_id).is_some();
            if removed {
                info!("Removed light: {}", light_id);
                Self::send(to_engine, FromPlatformMessage::LightRemoved { light_id }).await;
            }
            return Ok(());
        }

        let discovery: DiscoveryMessage =
            serde_json::from_slice(&msg.payload).map_err(invalid_data)?;
        let mut light =
            Light::from_discovery(discovery, light_id.clone(), &node_id).map_err(invalid_data)?;

        info!("Discovered light: {} ({})", light.name, light_id);
        let state_topic = light.state_topic.clone();

        {
            let mut lights_guard = lights.lock().await;
            // Rediscovery keeps what we already know about the light's state.
            if let Some(existing) = lights_guard.get(&light_id) {
                light.state = existing.state.clone();
                light.has_state = existing.has_state;
            }
            lights_guard.insert(light_id.clone(), light);
        }

        // Subscribe after map insert so the retained state message finds the
        // light already in the map.
        client.subscribe(&state_topic).await?;

        Self::send(
            to_engine,
            FromPlatformMessage::LightDiscovered {
                light_id,
                platform: PLATFORM_NAME.to_string(),
            },
        )
        .await;

        Ok(())
    }

    async fn handle_state_update(
        msg: &MqttMessage,
        lights: &LightsMap,
        to_engine: &FromPlatformSender,
    ) -> Result<(), Box<dyn Error + Send>> {
        let change = {
            let mut lights_guard = lights.lock().await;
            let Some(light) = lights_guard
                .values_mut()
                .find(|light| light.state_topic == msg.topic)
            else {
                trace!("No light listens on {}", msg.topic);
                return Ok(());
            };

            let primed = light.has_state;
            let old = light.state.clone();
            light.update_state(&msg.payload).map_err(invalid_data)?;

            if !primed {
                debug!("Initial state for {}: {:?}", light.id, light.state);
                return Ok(());
            }
            if light.state == old {
                return Ok(());
            }
            StateChanged {
                light_id: light.id.clone(),
                old,
                new: light.state.clone(),
                self_originated: false,
            }
        };

        Self::send(to_engine, FromPlatformMessage::LightStateChanged(change)).await;
        Ok(())
    }

    async fn send(to_engine: &FromPlatformSender, msg: FromPlatformMessage) {
        if let Err(e) = to_engine.send(msg).await {
            warn!("Failed to notify engine: {}", e);
        }
    }
}

#[async_trait]
impl<C: MqttClient + 'static> DevicePlatform for MqttPlatform<C> {
    fn name(&self) -> &str {
        PLATFORM_NAME
    }

    async fn setup(&self, tx: FromPlatformSender) -> Result<(), Box<dyn Error + Send>> {
        info!(
            "Connecting to MQTT broker at {}:{}",
            self.config.broker, self.config.port
        );
        let messages = self.client.connect().await?;

        let light_discovery = format!("{}/light/+/+/config", self.config.discovery_prefix);
        info!("Subscribing to discovery topic: {}", light_discovery);
        self.client.subscribe(&light_discovery).await?;

        let task = tokio::spawn(Self::process_messages_task(
            messages,
            self.client.clone(),
            self.config.clone(),
            self.lights.clone(),
            tx,
        ));
        if let Some(old) = self
            .message_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task)
        {
            old.abort();
        }

        info!("MQTT platform ready");
        Ok(())
    }

    async fn get_snapshot(&self, light_id: &str) -> crate::Result<LightSnapshot> {
        self.lights
            .lock()
            .await
            .get(light_id)
            .map(Light::snapshot)
            .ok_or_else(|| crate::Error::DeviceNotFound(light_id.to_string()))
    }

    async fn send_command(&self, light_id: &str, command: LightCommand) -> crate::Result<()> {
        let (topic, payload) = {
            let lights_guard = self.lights.lock().await;
            let light = lights_guard
                .get(light_id)
                .ok_or_else(|| crate::Error::DeviceNotFound(light_id.to_string()))?;
            (light.command_topic.clone(), light.command_payload(&command)?)
        };

        self.client
            .publish(&topic, &payload, false)
            .await
            .map_err(|e| crate::Error::DeviceUnavailable {
                light_id: light_id.to_string(),
                reason: e.to_string(),
            })?;

        debug!("Sent command to {}: {}", light_id, command);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), Box<dyn Error + Send>> {
        info!("MQTT platform shutting down");
        let task = self
            .message_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
        self.client.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::color::Hs;
    use crate::engine::LightColor;
    use crate::engine::LightState;
    use crate::integrations::mqtt::client::MockMqttClient;

    const DISCOVERY_TOPIC: &str = "homeassistant/light/kitchen/light/config";
    const STATE_TOPIC: &str = "zigbee2mqtt/kitchen";
    const DISCOVERY: &[u8] = br#"{
        "schema": "json",
        "name": "Kitchen",
        "state_topic": "zigbee2mqtt/kitchen",
        "command_topic": "zigbee2mqtt/kitchen/set",
        "brightness": true,
        "supported_color_modes": ["hs", "color_temp"],
        "min_mireds": 153,
        "max_mireds": 500
    }"#;

    fn config() -> MqttConfig {
        MqttConfig {
            broker: "localhost".to_string(),
            port: 1883,
            client_id: "test".to_string(),
            discovery_prefix: "homeassistant".to_string(),
            username: None,
            password: None,
        }
    }

    async fn setup() -> (
        MqttPlatform<MockMqttClient>,
        MockMqttClient,
        mpsc::Receiver<FromPlatformMessage>,
    ) {
        let client = MockMqttClient::new();
        let platform = MqttPlatform::new(client.clone(), &config());
        let (tx, rx) = mpsc::channel(16);
        platform.setup(tx).await.unwrap();
        (platform, client, rx)
    }

    async fn discover(client: &MockMqttClient, rx: &mut mpsc::Receiver<FromPlatformMessage>) {
        client.add_message(DISCOVERY_TOPIC, DISCOVERY);
        assert_eq!(
            rx.recv().await,
            Some(FromPlatformMessage::LightDiscovered {
                light_id: "light.kitchen".to_string(),
                platform: "mqtt".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_setup_subscribes_to_discovery() {
        let (platform, client, _rx) = setup().await;
        assert!(client.is_connected());
        assert_eq!(client.subscriptions(), vec!["homeassistant/light/+/+/config"]);

        assert!(matches!(
            platform.get_snapshot("light.kitchen").await,
            Err(crate::Error::DeviceNotFound(_))
        ));

        platform.shutdown().await.unwrap();
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_discovery_and_state_changes() {
        let (platform, client, mut rx) = setup().await;
        discover(&client, &mut rx).await;
        assert!(client.subscriptions().contains(&STATE_TOPIC.to_string()));

        // The first state message primes the light without a notification.
        client.add_message(STATE_TOPIC, br#"{"state": "ON", "brightness": 200}"#);
        client.add_message(
            STATE_TOPIC,
            br#"{"state": "ON", "brightness": 100, "color_mode": "hs", "color": {"hue": 120, "saturation": 80}}"#,
        );

        let expected_old = LightState {
            on: true,
            brightness: Some(200),
            color: None,
        };
        let expected_new = LightState {
            on: true,
            brightness: Some(100),
            color: Some(LightColor::Hs(Hs::new(120.0, 80.0))),
        };
        assert_eq!(
            rx.recv().await,
            Some(FromPlatformMessage::LightStateChanged(StateChanged {
                light_id: "light.kitchen".to_string(),
                old: expected_old,
                new: expected_new.clone(),
                self_originated: false,
            }))
        );

        let snapshot = platform.get_snapshot("light.kitchen").await.unwrap();
        assert_eq!(snapshot.state, expected_new);
        assert!(snapshot.capabilities.supports_color_temp());
        assert_eq!(snapshot.capabilities.max_mireds, Some(500));
    }

    #[tokio::test]
    async fn test_discovery_removal() {
        let (platform, client, mut rx) = setup().await;
        discover(&client, &mut rx).await;

        client.add_message(DISCOVERY_TOPIC, b"");
        assert_eq!(
            rx.recv().await,
            Some(FromPlatformMessage::LightRemoved {
                light_id: "light.kitchen".to_string(),
            })
        );
        assert!(platform.get_snapshot("light.kitchen").await.is_err());
    }

    #[tokio::test]
    async fn test_send_command() {
        let (platform, client, mut rx) = setup().await;
        discover(&client, &mut rx).await;

        platform
            .send_command(
                "light.kitchen",
                LightCommand::to(Some(50), Some(LightColor::ColorTemp(300))),
            )
            .await
            .unwrap();

        let published = client.published();
        assert_eq!(published.len(), 1);
        let (topic, payload, retain) = &published[0];
        assert_eq!(topic, "zigbee2mqtt/kitchen/set");
        assert!(!retain);
        insta::assert_snapshot!(
            String::from_utf8_lossy(payload),
            @r#"{"brightness":50,"color_temp":300,"state":"ON"}"#
        );
    }

    #[tokio::test]
    async fn test_send_command_errors() {
        let (platform, client, mut rx) = setup().await;

        assert!(matches!(
            platform.send_command("light.kitchen", LightCommand::off()).await,
            Err(crate::Error::DeviceNotFound(_))
        ));

        discover(&client, &mut rx).await;
        client.fail_publishes();
        assert!(matches!(
            platform.send_command("light.kitchen", LightCommand::off()).await,
            Err(crate::Error::DeviceUnavailable { .. })
        ));
    }
}
