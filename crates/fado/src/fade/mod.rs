//! The fade engine proper: planning, execution, expectation tracking and
//! manual-intervention handling.

mod controller;
pub mod expected;
pub mod memory;
pub mod params;
pub mod planner;
mod reconciler;

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

pub use controller::FadeController;
pub use controller::FadeOutcome;
pub use controller::FadeTicket;
pub use expected::Classification;
pub use expected::ExpectationTracker;
pub use expected::ExpectedValues;
pub use memory::BrightnessMemory;
pub use memory::MemoryRecord;
pub use params::FadeParams;
pub use params::FadeRequestInput;
pub use params::ParamsError;
pub use planner::FadeChange;
pub use planner::FadePlan;
pub use planner::FadeStep;
pub use reconciler::Reconciler;

use crate::engine::DevicePlatform;

/// Effective per-light fade parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightParams {
    /// Floor for the delay between two steps.
    pub min_step_delay_ms: u64,

    /// Lowest brightness at which the light actually emits light.
    pub min_brightness: u8,

    /// Ask the hardware to smooth each step with its own transition.
    pub native_transitions: bool,
}

impl Default for LightParams {
    fn default() -> Self {
        Self {
            min_step_delay_ms: 100,
            min_brightness: 2,
            native_transitions: false,
        }
    }
}

/// State shared by the controller and the reconciler.
pub struct FadeContext {
    pub platform: Arc<dyn DevicePlatform>,
    pub memory: BrightnessMemory,
    tracker: Mutex<ExpectationTracker>,
}

impl FadeContext {
    pub fn new(
        platform: Arc<dyn DevicePlatform>,
        memory: BrightnessMemory,
        tracker: ExpectationTracker,
    ) -> Self {
        Self {
            platform,
            memory,
            tracker: Mutex::new(tracker),
        }
    }

    /// Run `f` with the expectation tracker locked.
    pub fn with_tracker<T>(&self, f: impl FnOnce(&mut ExpectationTracker) -> T) -> T {
        let mut tracker = self.tracker.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut tracker)
    }
}
