//! Manual intervention handling.
//!
//! A notification nobody expected means a person (or another controller)
//! touched the light. The running fade is stopped, brightness memory is
//! updated to what the person meant, and once the fade has fully stopped the
//! light is corrected to that intended state.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::controller::FadeController;
use super::expected::Classification;
use super::expected::ExpectedValues;
use super::planner::FadeStep;
use super::FadeContext;
use crate::engine::LightColor;
use crate::engine::LightCommand;
use crate::engine::LightState;
use crate::engine::StateChanged;

/// What the person at the switch wants the light to be.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntendedState {
    pub on: bool,
    pub brightness: Option<u8>,
    pub color: Option<LightColor>,
}

impl IntendedState {
    fn off() -> Self {
        Self {
            on: false,
            brightness: None,
            color: None,
        }
    }

    /// Command that moves `actual` to this state, if they differ.
    pub fn correction(&self, actual: &LightState, dimmable: bool) -> Option<LightCommand> {
        if !self.on {
            return actual.on.then(LightCommand::off);
        }

        let brightness = self
            .brightness
            .filter(|b| dimmable && (!actual.on || actual.brightness != Some(*b)));
        let color = self.color.filter(|c| actual.color != Some(*c));

        if actual.on && brightness.is_none() && color.is_none() {
            return None;
        }
        Some(LightCommand::to(brightness, color))
    }
}

pub struct Reconciler {
    ctx: Arc<FadeContext>,
    controller: Arc<FadeController>,
    tearing_down: AtomicBool,
}

impl Reconciler {
    pub fn new(ctx: Arc<FadeContext>, controller: Arc<FadeController>) -> Self {
        Self {
            ctx,
            controller,
            tearing_down: AtomicBool::new(false),
        }
    }

    /// Stop acting on notifications.
    pub fn begin_teardown(&self) {
        self.tearing_down.store(true, Ordering::Release);
    }

    /// Handle one state-change notification.
    pub async fn on_state_changed(&self, change: &StateChanged) {
        let light_id = change.light_id.as_str();

        if self.tearing_down.load(Ordering::Acquire) {
            debug!("Ignoring {} during teardown", light_id);
            self.controller.set_restoring(light_id, false);
            self.ctx.with_tracker(|t| t.clear(light_id));
            return;
        }

        if change.self_originated {
            trace!("Ignoring self-originated change on {}", light_id);
            return;
        }
        if change.old == change.new {
            return;
        }
        if self.ctx.memory.is_excluded(light_id) {
            trace!("Ignoring change on excluded light {}", light_id);
            return;
        }

        let classification = self
            .ctx
            .with_tracker(|t| t.classify(light_id, &change.old, &change.new, Instant::now()));
        match classification {
            Classification::Expected => {
                trace!("Expected change on {}", light_id);
                return;
            }
            Classification::InTransition => {
                trace!("{} is transitioning", light_id);
                return;
            }
            Classification::Unexpected => {}
        }

        info!(
            "Manual change on {}: on={} brightness={:?} -> on={} brightness={:?}",
            light_id, change.old.on, change.old.brightness, change.new.on, change.new.brightness
        );

        let intended = self.intended_state(light_id, &change.old, &change.new);

        let slot = self.controller.interrupt(light_id).await;
        self.controller.set_restoring(light_id, true);
        self.correct(light_id, &intended).await;
        self.controller.set_restoring(light_id, false);
        drop(slot);

        if let Err(e) = self.ctx.memory.flush().await {
            warn!("Failed to persist brightness memory: {}", e);
        }
    }

    /// Work out the intended state and update brightness memory to match.
    fn intended_state(&self, light_id: &str, old: &LightState, new: &LightState) -> IntendedState {
        let memory = &self.ctx.memory;

        if !new.on {
            if let Some(brightness) = old.observed_brightness().filter(|b| *b > 0) {
                debug!("{} turned off from {}", light_id, brightness);
                memory.set_previous(light_id, brightness);
            }
            return IntendedState::off();
        }

        let brightness = if !old.on {
            let previous = memory.previous(light_id);
            let original = memory.original(light_id);
            match new.brightness {
                Some(b) if previous != 0 && b != previous => {
                    debug!("{} turned on at new brightness {}", light_id, b);
                    memory.set_original(light_id, b);
                    Some(b)
                }
                reported if original > 0 => {
                    debug!(
                        "{} turned on at {:?}, restoring {}",
                        light_id, reported, original
                    );
                    Some(original)
                }
                reported => reported,
            }
        } else {
            match new.brightness {
                Some(b) if new.brightness != old.brightness => {
                    debug!("{} brightness changed to {}", light_id, b);
                    memory.set_original(light_id, b);
                    Some(b)
                }
                reported => reported,
            }
        };

        IntendedState {
            on: true,
            brightness,
            color: new.color,
        }
    }

    /// Re-read the light and issue one command if it is not where it should
    /// be.
    async fn correct(&self, light_id: &str, intended: &IntendedState) {
        let snapshot = match self.ctx.platform.get_snapshot(light_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Cannot reconcile {}: {}", light_id, e);
                return;
            }
        };

        let dimmable = snapshot.capabilities.supports_brightness();
        let Some(command) = intended.correction(&snapshot.state, dimmable) else {
            debug!("{} already matches the intended state", light_id);
            return;
        };

        let step = FadeStep {
            brightness: if command.on { command.brightness } else { Some(0) },
            color: command.color,
        };
        let expected = ExpectedValues::from_step(&step);
        self.ctx
            .with_tracker(|t| t.record(light_id, expected, Instant::now()));

        info!("Correcting {}: {}", light_id, command);
        if let Err(e) = self.ctx.platform.send_command(light_id, command).await {
            warn!("Corrective command for {} failed: {}", light_id, e);
        }
    }
}
