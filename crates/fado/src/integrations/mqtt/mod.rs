mod client;
mod config;
mod discovery;
mod light;
#[allow(clippy::module_inception)]
mod mqtt;

use anyhow::Context;
pub use client::MqttClient;
pub use client::MqttMessage;
pub use client::MqttMessages;
pub use client::RumqttcClient;
pub use config::Config as MqttConfig;
use linkme::distributed_slice;
pub use mqtt::MqttPlatform;

use crate::engine;

#[distributed_slice(engine::PLATFORM_REGISTRY)]
fn init_mqtt(ctx: &engine::PlatformContext) -> engine::PlatformFactoryResult {
    let mqtt_config = if let Some(c) = &ctx.config.integrations.mqtt {
        c
    } else {
        return Ok(None);
    };

    let client = RumqttcClient::new(mqtt_config).context("Failed to create MQTT client")?;
    Ok(Some(Box::new(MqttPlatform::new(client, mqtt_config))))
}
