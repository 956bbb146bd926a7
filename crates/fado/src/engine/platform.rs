use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use async_trait::async_trait;
use linkme::distributed_slice;
use tokio::sync::mpsc;
use tracing::error;
use tracing::warn;

use super::message::FromPlatformMessage;
use super::message::LightCommand;
use super::state::LightSnapshot;
use crate::config::Config;

/// Channel types for messages FROM platforms TO the engine.
/// Bounded so a chatty platform feels backpressure instead of growing memory.
pub type FromPlatformSender = mpsc::Sender<FromPlatformMessage>;
pub type FromPlatformReceiver = mpsc::Receiver<FromPlatformMessage>;

/// Result type for platform factory functions
pub type PlatformFactoryResult = anyhow::Result<Option<Box<dyn DevicePlatform>>>;

pub struct PlatformContext<'a> {
    pub config: &'a Config,
}

#[distributed_slice]
pub static REGISTRY: [fn(&PlatformContext) -> PlatformFactoryResult];

/// Device platform the fade engine drives.
///
/// Snapshots and commands are request/response; state changes flow back over
/// the sender handed to `setup`.
#[async_trait]
pub trait DevicePlatform: Send + Sync {
    /// Get the name/identifier of this platform
    fn name(&self) -> &str;

    /// Connect, discover lights and start reporting state changes to `tx`.
    async fn setup(&self, tx: FromPlatformSender) -> Result<(), Box<dyn Error + Send>>;

    /// Current state and capabilities of a light.
    ///
    /// Fails with `DeviceNotFound` for lights the platform does not know.
    async fn get_snapshot(&self, light_id: &str) -> crate::Result<LightSnapshot>;

    /// Issue a command to a light.
    ///
    /// Fails with `DeviceUnavailable` when the light cannot be reached and
    /// `UnsupportedCapability` when the command asks for something the light
    /// cannot do.
    async fn send_command(&self, light_id: &str, command: LightCommand) -> crate::Result<()>;

    /// Shut down the platform gracefully
    async fn shutdown(&self) -> Result<(), Box<dyn Error + Send>>;
}

/// Build every platform enabled in `config`.
///
/// Factories that fail are logged and skipped.
pub fn platforms_from_config(config: &Config) -> Vec<Box<dyn DevicePlatform>> {
    let ctx = PlatformContext { config };
    let mut platforms = Vec::new();
    for constr in REGISTRY {
        match constr(&ctx) {
            Ok(Some(p)) => platforms.push(p),
            Ok(None) => continue,
            Err(e) => {
                error!("failed to setup platform: {:#}", e);
            }
        }
    }
    platforms
}

/// Fans the platform port out over several platforms.
///
/// The platform owning a light is found by asking each one for a snapshot
/// and remembered afterwards.
pub struct PlatformRouter {
    platforms: Vec<Arc<dyn DevicePlatform>>,
    routes: Mutex<HashMap<String, usize>>,
}

impl PlatformRouter {
    pub fn new(platforms: Vec<Box<dyn DevicePlatform>>) -> Self {
        Self {
            platforms: platforms.into_iter().map(Arc::from).collect(),
            routes: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }

    fn route(&self, light_id: &str) -> Option<usize> {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(light_id)
            .copied()
    }

    async fn find(&self, light_id: &str) -> crate::Result<(usize, LightSnapshot)> {
        for (i, platform) in self.platforms.iter().enumerate() {
            match platform.get_snapshot(light_id).await {
                Ok(snapshot) => {
                    self.routes
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(light_id.to_string(), i);
                    return Ok((i, snapshot));
                }
                Err(crate::Error::DeviceNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(crate::Error::DeviceNotFound(light_id.to_string()))
    }
}

#[async_trait]
impl DevicePlatform for PlatformRouter {
    fn name(&self) -> &str {
        "router"
    }

    async fn setup(&self, tx: FromPlatformSender) -> Result<(), Box<dyn Error + Send>> {
        for platform in &self.platforms {
            if let Err(e) = platform.setup(tx.clone()).await {
                warn!("Platform '{}' setup failed: {}", platform.name(), e);
            }
        }
        Ok(())
    }

    async fn get_snapshot(&self, light_id: &str) -> crate::Result<LightSnapshot> {
        if let Some(i) = self.route(light_id) {
            return self.platforms[i].get_snapshot(light_id).await;
        }
        self.find(light_id).await.map(|(_, snapshot)| snapshot)
    }

    async fn send_command(&self, light_id: &str, command: LightCommand) -> crate::Result<()> {
        let i = match self.route(light_id) {
            Some(i) => i,
            None => self.find(light_id).await?.0,
        };
        self.platforms[i].send_command(light_id, command).await
    }

    async fn shutdown(&self) -> Result<(), Box<dyn Error + Send>> {
        for platform in &self.platforms {
            if let Err(e) = platform.shutdown().await {
                warn!("Platform '{}' shutdown failed: {}", platform.name(), e);
            }
        }
        Ok(())
    }
}
