//! Fade execution.
//!
//! Each light has a slot guarded by an async mutex. Whoever holds the slot
//! owns the light: starting a fade takes the slot, stops whatever fade was
//! running, plans and spawns the new one. The reconciler takes the same slot
//! to stop a fade and correct the light, so at most one command stream per
//! light is ever live.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::expected::ExpectedValues;
use super::params::FadeParams;
use super::planner::FadeChange;
use super::planner::FadePlan;
use super::planner::FadeStep;
use super::FadeContext;
use super::LightParams;
use crate::error::Error;

/// How a fade ended for one light.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FadeOutcome {
    /// Every step was issued.
    Completed,
    /// Stopped by a newer fade, a manual change or shutdown.
    Cancelled,
    /// Not faded at all.
    Skipped { reason: String },
    /// A command failed; the fade was abandoned.
    Failed { error: String },
}

impl FadeOutcome {
    fn skipped(reason: impl ToString) -> Self {
        FadeOutcome::Skipped {
            reason: reason.to_string(),
        }
    }
}

/// Completion side of a started fade.
#[derive(Debug)]
pub struct FadeTicket {
    done: Option<oneshot::Receiver<FadeOutcome>>,
    outcome: Option<FadeOutcome>,
}

impl FadeTicket {
    fn ready(outcome: FadeOutcome) -> Self {
        Self {
            done: None,
            outcome: Some(outcome),
        }
    }

    fn pending(done: oneshot::Receiver<FadeOutcome>) -> Self {
        Self {
            done: Some(done),
            outcome: None,
        }
    }

    /// Wait for the fade to end.
    pub async fn wait(self) -> FadeOutcome {
        if let Some(outcome) = self.outcome {
            return outcome;
        }
        match self.done {
            Some(done) => done.await.unwrap_or(FadeOutcome::Cancelled),
            None => FadeOutcome::Cancelled,
        }
    }
}

struct FadeHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl FadeHandle {
    /// Signal cancellation and wait for the step loop to exit.
    async fn stop(self) {
        let _ = self.cancel.send(true);
        if let Err(e) = self.task.await {
            warn!("Fade task ended abnormally: {}", e);
        }
    }
}

/// Per-light ownership slot.
#[derive(Default)]
pub struct FadeSlot {
    handle: Option<FadeHandle>,
}

impl FadeSlot {
    /// Stop the running fade, if any, and wait until it has fully exited.
    pub async fn stop(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                let was_running = !handle.task.is_finished();
                handle.stop().await;
                was_running
            }
            None => false,
        }
    }
}

/// Slot held by the reconciler while it corrects a light.
pub type SlotGuard = OwnedMutexGuard<FadeSlot>;

/// Live status of one light.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FadeStatus {
    pub is_fading: bool,
    pub is_restoring: bool,
}

#[derive(Default)]
struct SlotEntry {
    slot: Arc<tokio::sync::Mutex<FadeSlot>>,
    fading: Arc<AtomicBool>,
    restoring: bool,
}

pub struct FadeController {
    ctx: Arc<FadeContext>,
    slots: Mutex<HashMap<String, SlotEntry>>,
}

impl FadeController {
    pub fn new(ctx: Arc<FadeContext>) -> Self {
        Self {
            ctx,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, SlotEntry>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, light_id: &str) -> (Arc<tokio::sync::Mutex<FadeSlot>>, Arc<AtomicBool>) {
        let mut slots = self.slots();
        let entry = slots.entry(light_id.to_string()).or_default();
        (entry.slot.clone(), entry.fading.clone())
    }

    /// Take ownership of a light, stopping any fade running on it.
    pub async fn interrupt(&self, light_id: &str) -> SlotGuard {
        let (slot, _) = self.slot(light_id);
        let mut guard = slot.lock_owned().await;
        if guard.stop().await {
            info!("Fade on {} interrupted", light_id);
        }
        guard
    }

    /// Stop a light's fade, if any.
    pub async fn cancel(&self, light_id: &str) {
        drop(self.interrupt(light_id).await);
    }

    /// Stop every running fade.
    pub async fn cancel_all(&self) {
        let ids: Vec<String> = self.slots().keys().cloned().collect();
        for id in ids {
            self.cancel(&id).await;
        }
    }

    pub fn set_restoring(&self, light_id: &str, restoring: bool) {
        if let Some(entry) = self.slots().get_mut(light_id) {
            entry.restoring = restoring;
        }
    }

    /// Drop bookkeeping of interrupted fades.
    pub fn clear_restoring(&self) {
        for entry in self.slots().values_mut() {
            entry.restoring = false;
        }
    }

    /// Status of every light with a running fade or restore.
    pub fn statuses(&self) -> HashMap<String, FadeStatus> {
        self.slots()
            .iter()
            .map(|(id, entry)| {
                let status = FadeStatus {
                    is_fading: entry.fading.load(Ordering::Acquire),
                    is_restoring: entry.restoring,
                };
                (id.clone(), status)
            })
            .filter(|(_, status)| status.is_fading || status.is_restoring)
            .collect()
    }

    pub fn is_fading(&self, light_id: &str) -> bool {
        self.slots()
            .get(light_id)
            .is_some_and(|e| e.fading.load(Ordering::Acquire))
    }

    /// Drop the slot of a light that is neither fading nor being restored.
    pub fn forget(&self, light_id: &str) {
        let mut slots = self.slots();
        let idle = slots
            .get(light_id)
            .is_some_and(|e| !e.fading.load(Ordering::Acquire) && !e.restoring);
        if idle {
            slots.remove(light_id);
        }
    }

    /// Plan and start a fade on one light.
    ///
    /// Any fade already running on the light is stopped and awaited first.
    pub async fn start_fade(
        &self,
        light_id: &str,
        params: &FadeParams,
        light: LightParams,
    ) -> FadeTicket {
        if self.ctx.memory.is_excluded(light_id) {
            debug!("Skipping excluded light {}", light_id);
            return FadeTicket::ready(FadeOutcome::skipped("excluded"));
        }

        let mut slot = self.interrupt(light_id).await;
        let (_, fading) = self.slot(light_id);

        let snapshot = match self.ctx.platform.get_snapshot(light_id).await {
            Ok(snapshot) => snapshot,
            Err(e @ Error::DeviceNotFound(_)) => {
                warn!("Skipping {}: {}", light_id, e);
                return FadeTicket::ready(FadeOutcome::skipped(e));
            }
            Err(e) => {
                warn!("Failed to read {}: {}", light_id, e);
                return FadeTicket::ready(FadeOutcome::Failed {
                    error: e.to_string(),
                });
            }
        };

        let original = self.ctx.memory.original(light_id);
        let Some(change) = FadeChange::resolve(params, &snapshot, &light, original) else {
            debug!("{} is already at the requested values", light_id);
            return FadeTicket::ready(FadeOutcome::skipped("no change"));
        };
        let plan = change.plan();
        if plan.is_empty() {
            return FadeTicket::ready(FadeOutcome::skipped("no change"));
        }

        if let Some(brightness) = snapshot.state.on.then_some(snapshot.state.brightness).flatten() {
            if self.ctx.memory.seed_original(light_id, brightness) {
                debug!("Seeded original brightness of {} to {}", light_id, brightness);
            }
        }

        info!(
            "Fading {} in {} steps every {:?} ({})",
            light_id,
            plan.steps.len(),
            plan.step_delay,
            change.easing()
        );

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (done_tx, done_rx) = oneshot::channel();
        let run = FadeRun {
            ctx: self.ctx.clone(),
            light_id: light_id.to_string(),
            plan,
            native_transitions: light.native_transitions,
            cancel: cancel_rx,
        };
        fading.store(true, Ordering::Release);
        let task = tokio::spawn(async move {
            let outcome = run.execute().await;
            fading.store(false, Ordering::Release);
            let _ = done_tx.send(outcome);
        });

        slot.handle = Some(FadeHandle {
            cancel: cancel_tx,
            task,
        });

        FadeTicket::pending(done_rx)
    }
}

/// One running fade.
struct FadeRun {
    ctx: Arc<FadeContext>,
    light_id: String,
    plan: FadePlan,
    native_transitions: bool,
    cancel: watch::Receiver<bool>,
}

impl FadeRun {
    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Record the expectation for `values` and send the command.
    async fn issue(
        &self,
        values: &FadeStep,
        from: Option<&FadeStep>,
        transition_ms: Option<u32>,
    ) -> crate::Result<()> {
        let mut expected = ExpectedValues::from_step(values);
        if let Some(from) = from {
            expected = expected.with_from(from);
        }
        self.ctx
            .with_tracker(|t| t.record(&self.light_id, expected, Instant::now()));

        let command = values
            .command(self.plan.dimmable)
            .with_transition_ms(transition_ms);
        debug!("{}: {} expecting {}", self.light_id, command, expected);
        self.ctx.platform.send_command(&self.light_id, command).await
    }

    async fn execute(mut self) -> FadeOutcome {
        if let Some(from_step) = self.plan.from_step {
            if self.cancelled() {
                return FadeOutcome::Cancelled;
            }
            if let Err(e) = self.issue(&from_step, None, None).await {
                return self.fail(e);
            }
        }

        // Step i goes out once the delays of the steps before it have passed,
        // so the terminal step lands at the requested duration.
        let mut wait = self.plan.step_delay;
        let mut since = Instant::now();
        for step in &self.plan.steps {
            let remaining = wait.saturating_sub(since.elapsed());
            if !remaining.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(remaining) => {}
                    changed = self.cancel.changed() => {
                        if changed.is_err() {
                            debug!("Fade on {} lost its handle", self.light_id);
                            return FadeOutcome::Cancelled;
                        }
                    }
                }
            }
            if self.cancelled() {
                debug!("Fade on {} cancelled before step {}", self.light_id, step.index);
                return FadeOutcome::Cancelled;
            }

            since = Instant::now();
            let (transition_ms, from) = if self.native_transitions {
                (Some(step.delay.as_millis() as u32), Some(&step.from))
            } else {
                (None, None)
            };
            if let Err(e) = self.issue(&step.values, from, transition_ms).await {
                return self.fail(e);
            }
            if self.cancelled() {
                debug!("Fade on {} cancelled during step {}", self.light_id, step.index);
                return FadeOutcome::Cancelled;
            }
            wait = step.delay;
        }

        self.complete().await
    }

    fn fail(&self, error: Error) -> FadeOutcome {
        warn!("Fade on {} aborted: {}", self.light_id, error);
        FadeOutcome::Failed {
            error: error.to_string(),
        }
    }

    async fn complete(&self) -> FadeOutcome {
        if self.plan.dimmable {
            if let Some(brightness) = self.plan.final_brightness().filter(|b| *b > 0) {
                self.ctx.memory.set_original(&self.light_id, brightness);
            }
        }
        if let Err(e) = self.ctx.memory.flush().await {
            warn!("Failed to persist brightness memory: {}", e);
        }
        info!("Fade on {} completed", self.light_id);
        FadeOutcome::Completed
    }
}
