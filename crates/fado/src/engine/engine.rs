use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::message::FromPlatformMessage;
use super::platform::DevicePlatform;
use super::platform::FromPlatformReceiver;
use crate::config::Config;
use crate::config::LightConfig;
use crate::easing::Easing;
use crate::fade::memory::BrightnessMemory;
use crate::fade::memory::MemoryRecord;
use crate::fade::ExpectationTracker;
use crate::fade::FadeContext;
use crate::fade::FadeController;
use crate::fade::FadeOutcome;
use crate::fade::FadeParams;
use crate::fade::LightParams;
use crate::fade::Reconciler;
use crate::storage::Storage;

/// How often expired expectations are dropped.
const PRUNE_INTERVAL: Duration = Duration::from_secs(1);

/// Effective engine settings, resolved from configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Global floor for step delays; per-light values never go below it.
    pub min_step_delay_ms: u64,
    pub default_transition_ms: u32,
    pub default_easing: Easing,
    pub expectation_retention: usize,
    pub lights: HashMap<String, LightConfig>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_step_delay_ms: config.fade.min_step_delay_ms,
            default_transition_ms: (config.fade.default_transition_s * 1000.0) as u32,
            default_easing: config.fade.default_easing,
            expectation_retention: config.fade.expectation_retention,
            lights: config.lights.clone(),
        }
    }

    /// Parameters a fade on `light_id` runs with.
    pub fn light_params(&self, light_id: &str) -> LightParams {
        let light = self.lights.get(light_id).cloned().unwrap_or_default();
        LightParams {
            min_step_delay_ms: light
                .min_delay_ms
                .unwrap_or(self.min_step_delay_ms)
                .max(self.min_step_delay_ms),
            min_brightness: light.min_brightness,
            native_transitions: light.native_transitions,
        }
    }
}

/// Per-light result of a fade request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FadeReport {
    pub lights: BTreeMap<String, FadeOutcome>,
}

impl FadeReport {
    pub fn outcome(&self, light_id: &str) -> Option<&FadeOutcome> {
        self.lights.get(light_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FadeDiagnostics {
    pub is_fading: bool,
    pub is_restoring: bool,
    pub expected_state_count: usize,
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub records: BTreeMap<String, MemoryRecord>,
    pub active_fades: BTreeMap<String, FadeDiagnostics>,
    /// Known lights that are not excluded.
    pub light_count: usize,
}

/// fado engine
///
/// Owns brightness memory, the expectation tracker and every running fade.
/// Notifications from the device platform flow in through `run`; fade
/// requests come in through `request_fade`.
pub struct Engine {
    ctx: Arc<FadeContext>,
    controller: Arc<FadeController>,
    reconciler: Reconciler,
    settings: EngineSettings,

    /// Lights the platform has told us about
    known_lights: Mutex<BTreeSet<String>>,
}

impl Engine {
    /// Create an engine, loading brightness memory from `storage`.
    pub async fn new(
        platform: Arc<dyn DevicePlatform>,
        storage: Arc<dyn Storage>,
        settings: EngineSettings,
    ) -> crate::Result<Self> {
        let memory = BrightnessMemory::load(storage).await?;
        let tracker = ExpectationTracker::new(settings.expectation_retention);
        let ctx = Arc::new(FadeContext::new(platform, memory, tracker));
        let controller = Arc::new(FadeController::new(ctx.clone()));
        let reconciler = Reconciler::new(ctx.clone(), controller.clone());

        Ok(Self {
            ctx,
            controller,
            reconciler,
            settings,
            known_lights: Mutex::new(BTreeSet::new()),
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn known_lights(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.known_lights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the engine's notification loop
    ///
    /// Notifications are handled one at a time, in order. Returns when every
    /// sender has gone away.
    pub async fn run(&self, mut rx: FromPlatformReceiver) {
        info!("Engine starting");

        let mut prune = tokio::time::interval(PRUNE_INTERVAL);
        prune.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => self.handle_message(msg).await,
                    None => break,
                },
                _ = prune.tick() => {
                    self.ctx.with_tracker(|t| t.prune(Instant::now()));
                }
            }
        }

        info!("Engine shutting down");
    }

    /// Handle one message from a platform
    pub async fn handle_message(&self, msg: FromPlatformMessage) {
        match msg {
            FromPlatformMessage::LightDiscovered { light_id, platform } => {
                info!("Light discovered: {} (from {})", light_id, platform);
                self.known_lights().insert(light_id);
            }
            FromPlatformMessage::LightRemoved { light_id } => {
                info!("Light removed: {}", light_id);
                self.forget(&light_id).await;
            }
            FromPlatformMessage::LightStateChanged(change) => {
                debug!(
                    "Light state changed: {} -> on={}, brightness={:?}",
                    change.light_id, change.new.on, change.new.brightness
                );
                self.known_lights().insert(change.light_id.clone());
                self.reconciler.on_state_changed(&change).await;
            }
        }
    }

    /// Fade every light in `light_ids` and wait for all of them to finish.
    ///
    /// Lights are faded concurrently and independently; one failing light
    /// does not affect the others.
    pub async fn request_fade(&self, light_ids: &[String], params: FadeParams) -> FadeReport {
        let mut report = FadeReport::default();
        if params.is_noop() {
            debug!("Ignoring fade request without values");
            for id in light_ids {
                report.lights.insert(
                    id.clone(),
                    FadeOutcome::Skipped {
                        reason: "no values".to_string(),
                    },
                );
            }
            return report;
        }

        let mut tasks = JoinSet::new();
        let unique: BTreeSet<&String> = light_ids.iter().collect();
        for light_id in unique {
            let controller = self.controller.clone();
            let light_id = light_id.clone();
            let params = params.clone();
            let light = self.settings.light_params(&light_id);
            tasks.spawn(async move {
                let ticket = controller.start_fade(&light_id, &params, light).await;
                (light_id, ticket.wait().await)
            });
        }

        while let Some(result) = tasks.join_next().await {
            match result {
                Ok((light_id, outcome)) => {
                    report.lights.insert(light_id, outcome);
                }
                Err(e) => warn!("Fade task failed: {}", e),
            }
        }
        report
    }

    /// Exclude lights from fading and restoring.
    pub async fn exclude(&self, light_ids: &[String]) {
        for light_id in light_ids {
            info!("Excluding {}", light_id);
            self.ctx.memory.set_excluded(light_id, true);
            self.controller.cancel(light_id).await;
        }
        self.flush().await;
    }

    pub async fn include(&self, light_ids: &[String]) {
        for light_id in light_ids {
            info!("Including {}", light_id);
            self.ctx.memory.set_excluded(light_id, false);
        }
        self.flush().await;
    }

    /// Drop everything known about a light.
    pub async fn forget(&self, light_id: &str) {
        self.controller.cancel(light_id).await;
        self.controller.forget(light_id);
        self.ctx.with_tracker(|t| t.clear(light_id));
        self.ctx.memory.forget(light_id);
        self.known_lights().remove(light_id);
        self.flush().await;
    }

    /// Drop stored records of lights no platform knows any more.
    ///
    /// Meant to run once discovery has settled after startup. Excluded lights
    /// keep their records, as do lights whose platform fails for any reason
    /// other than not knowing them. Returns the number of records dropped.
    pub async fn prune_stale_records(&self) -> usize {
        let mut stale = Vec::new();
        for (light_id, record) in self.ctx.memory.records() {
            if record.excluded {
                continue;
            }
            match self.ctx.platform.get_snapshot(&light_id).await {
                Err(crate::Error::DeviceNotFound(_)) => stale.push(light_id),
                Err(e) => debug!("Keeping record for {}: {}", light_id, e),
                Ok(_) => {}
            }
        }

        for light_id in &stale {
            info!("Dropping stored record for vanished light {}", light_id);
            self.controller.forget(light_id);
            self.ctx.with_tracker(|t| t.clear(light_id));
            self.ctx.memory.forget(light_id);
        }
        if !stale.is_empty() {
            self.flush().await;
        }
        stale.len()
    }

    pub fn memory(&self, light_id: &str) -> MemoryRecord {
        self.ctx.memory.get(light_id)
    }

    pub fn is_fading(&self, light_id: &str) -> bool {
        self.controller.is_fading(light_id)
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let records = self.ctx.memory.records();
        let active_fades = self
            .controller
            .statuses()
            .into_iter()
            .map(|(id, status)| {
                let expected_state_count = self.ctx.with_tracker(|t| t.count(&id));
                let diag = FadeDiagnostics {
                    is_fading: status.is_fading,
                    is_restoring: status.is_restoring,
                    expected_state_count,
                };
                (id, diag)
            })
            .collect();
        let light_count = self
            .known_lights()
            .iter()
            .filter(|id| !self.ctx.memory.is_excluded(id))
            .count();

        Diagnostics {
            records,
            active_fades,
            light_count,
        }
    }

    /// Stop every fade and persist memory. Notifications arriving afterwards
    /// are ignored.
    pub async fn shutdown(&self) {
        info!("Stopping all fades");
        self.reconciler.begin_teardown();
        self.controller.cancel_all().await;
        self.controller.clear_restoring();
        self.ctx.with_tracker(|t| t.clear_all());
        self.flush().await;
    }

    async fn flush(&self) {
        if let Err(e) = self.ctx.memory.flush().await {
            warn!("Failed to persist brightness memory: {}", e);
        }
    }
}
