//! Step planning.
//!
//! A `FadeChange` holds resolved start/end values for every dimension being
//! faded. `FadeChange::resolve` builds one from a request and a light
//! snapshot; `FadeChange::plan` turns it into the concrete steps the
//! controller issues.

use std::time::Duration;

use tracing::debug;

use super::params::ColorTarget;
use super::params::FadeParams;
use super::LightParams;
use crate::color;
use crate::color::Hs;
use crate::easing::Easing;
use crate::engine::LightColor;
use crate::engine::LightCommand;
use crate::engine::LightSnapshot;
use crate::engine::LightState;

/// Smallest brightness change worth a step.
const MIN_BRIGHTNESS_DELTA: u32 = 1;
/// Smallest hue change (degrees) worth a step.
const MIN_HUE_DELTA: f64 = 1.0;
/// Smallest saturation change (percent) worth a step.
const MIN_SATURATION_DELTA: f64 = 1.0;
/// Smallest color temperature change (mireds) worth a step.
const MIN_MIREDS_DELTA: u32 = 5;

/// Share of a cross-mode fade spent in the starting color model.
const HYBRID_SOURCE_PHASE_RATIO: f64 = 0.7;

/// Values a single step drives the light to.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FadeStep {
    pub brightness: Option<u8>,
    pub color: Option<LightColor>,
}

impl FadeStep {
    /// Command that applies this step. Brightness is left out for lights
    /// that cannot dim.
    pub fn command(&self, dimmable: bool) -> LightCommand {
        match self.brightness {
            Some(0) => LightCommand::off(),
            Some(b) => LightCommand::to(dimmable.then_some(b), self.color),
            None => LightCommand::to(None, self.color),
        }
    }
}

/// A step ready to be issued.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStep {
    /// 1-based position in the un-folded sequence.
    pub index: usize,
    pub values: FadeStep,
    /// Values the light is expected to be coming from.
    pub from: FadeStep,
    pub terminal: bool,
    /// Time to spend on this step before issuing the next one.
    pub delay: Duration,
}

/// Output of the planner.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FadePlan {
    /// Explicit starting values to apply before stepping.
    pub from_step: Option<FadeStep>,
    pub steps: Vec<PlannedStep>,
    pub step_delay: Duration,
    pub dimmable: bool,
}

impl FadePlan {
    pub fn is_empty(&self) -> bool {
        self.from_step.is_none() && self.steps.is_empty()
    }

    /// Brightness the plan leaves the light at, if it sets one.
    pub fn final_brightness(&self) -> Option<u8> {
        self.steps.last().and_then(|s| s.values.brightness)
    }

    pub fn total_delay(&self) -> Duration {
        self.steps.iter().map(|s| s.delay).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Hybrid {
    HsToMireds { crossover_hs: Hs, crossover_mireds: u16 },
    MiredsToHs { crossover_hs: Hs, crossover_mireds: u16 },
}

/// Resolved start/end values for a fade.
#[derive(Debug, Clone, PartialEq)]
pub struct FadeChange {
    start_brightness: Option<u8>,
    end_brightness: Option<u8>,
    start_hs: Option<Hs>,
    end_hs: Option<Hs>,
    start_mireds: Option<u16>,
    end_mireds: Option<u16>,
    transition_ms: u32,
    min_step_delay_ms: u64,
    min_brightness: u8,
    easing: Easing,
    dimmable: bool,
    hybrid: Option<Hybrid>,
    from_step: Option<FadeStep>,
}

/// Start and end of one fade, the inputs of the bare planner.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Endpoints {
    pub brightness: Option<(u8, u8)>,
    pub hs: Option<(Hs, Hs)>,
    pub mireds: Option<(u16, u16)>,
}

impl FadeChange {
    /// Fade between fixed endpoints on a dimmable light.
    ///
    /// `easing` is resolved against the brightness direction.
    pub fn between(
        endpoints: Endpoints,
        transition_ms: u32,
        light: &LightParams,
        easing: Easing,
    ) -> Self {
        let easing = match endpoints.brightness {
            Some((start, end)) => easing.resolve(start, end),
            None => easing.resolve(0, 0),
        };
        let endpoints = Endpoints {
            brightness: endpoints.brightness.filter(|(s, e)| s != e),
            hs: endpoints.hs.filter(|(s, e)| s != e),
            mireds: endpoints.mireds.filter(|(s, e)| s != e),
        };
        Self {
            start_brightness: endpoints.brightness.map(|(s, _)| s),
            end_brightness: endpoints.brightness.map(|(_, e)| e),
            start_hs: endpoints.hs.map(|(s, _)| s),
            end_hs: endpoints.hs.map(|(_, e)| e),
            start_mireds: endpoints.mireds.map(|(s, _)| s),
            end_mireds: endpoints.mireds.map(|(_, e)| e),
            transition_ms,
            min_step_delay_ms: light.min_step_delay_ms,
            min_brightness: light.min_brightness,
            easing,
            dimmable: true,
            hybrid: None,
            from_step: None,
        }
    }

    /// Resolve a request against a light's current snapshot and capabilities.
    ///
    /// Returns `None` when there is nothing to do for this light.
    /// `stored_original` is the remembered "on" brightness (0 if unknown),
    /// used when a color fade has to turn the light on.
    pub fn resolve(
        params: &FadeParams,
        snapshot: &LightSnapshot,
        light: &LightParams,
        stored_original: u8,
    ) -> Option<Self> {
        let caps = &snapshot.capabilities;
        let state = &snapshot.state;
        let min_brightness = light.min_brightness;

        let start_brightness = params
            .from
            .brightness
            .map(|b| b.to_raw(min_brightness))
            .unwrap_or_else(|| state.observed_brightness().unwrap_or(0))
            .max(min_brightness);

        let end_brightness = params.target.brightness.map(|b| match b.to_raw(min_brightness) {
            0 => 0,
            raw => raw.max(min_brightness),
        });

        let easing = params
            .easing
            .resolve(start_brightness, end_brightness.unwrap_or(start_brightness));

        if !caps.supports_brightness() {
            let end = end_brightness?;
            let target = if end > 0 { 255 } else { 0 };
            return Some(Self {
                start_brightness: Some(start_brightness),
                end_brightness: Some(target),
                start_hs: None,
                end_hs: None,
                start_mireds: None,
                end_mireds: None,
                transition_ms: 0,
                min_step_delay_ms: light.min_step_delay_ms,
                min_brightness,
                easing: Easing::Linear,
                dimmable: false,
                hybrid: None,
                from_step: None,
            });
        }

        let colors = ResolvedColors::resolve(params, snapshot);

        let end_brightness = auto_turn_on_brightness(
            start_brightness,
            end_brightness,
            &colors,
            state,
            min_brightness,
            stored_original,
        );

        let from_step = build_from_step(params, snapshot, min_brightness);

        // An off light asked to go to 0 stays off.
        let already_off = !state.on && params.from.brightness.is_none();
        let brightness_changing = match end_brightness {
            Some(0) if already_off => false,
            Some(end) => end != start_brightness,
            None => false,
        };
        let hs_changing = colors.end_hs.is_some() && colors.start_hs != colors.end_hs;
        let mireds_changing =
            colors.end_mireds.is_some() && colors.start_mireds != colors.end_mireds;

        if !brightness_changing && !hs_changing && !mireds_changing {
            return from_step.map(|from_step| Self {
                start_brightness: None,
                end_brightness: None,
                start_hs: None,
                end_hs: None,
                start_mireds: None,
                end_mireds: None,
                transition_ms: 0,
                min_step_delay_ms: light.min_step_delay_ms,
                min_brightness,
                easing,
                dimmable: true,
                hybrid: None,
                from_step: Some(from_step),
            });
        }

        let ResolvedColors {
            mut start_hs,
            end_hs,
            mut start_mireds,
            end_mireds,
            min_mireds,
            max_mireds,
        } = colors;

        let hybrid = detect_hybrid(
            start_hs,
            end_hs,
            start_mireds,
            end_mireds,
            min_mireds,
            max_mireds,
        );

        if hybrid.is_none() {
            if let (Some(end), None) = (end_mireds, start_mireds) {
                let start = match (min_mireds, max_mireds) {
                    (Some(min), Some(max)) => {
                        if end.abs_diff(min) <= end.abs_diff(max) {
                            min
                        } else {
                            max
                        }
                    }
                    (Some(min), None) => min,
                    (None, Some(max)) => max,
                    (None, None) => end,
                };
                debug!("No start color temperature, starting from {} mireds", start);
                start_mireds = Some(start);
            }
            if end_hs.is_some() && start_hs.is_none() {
                debug!("No start HS color, starting from white");
                start_hs = Some(Hs::WHITE);
            }
        }

        let keep_hs = hs_changing || hybrid.is_some();
        let keep_mireds = mireds_changing || hybrid.is_some();

        Some(Self {
            start_brightness: brightness_changing.then_some(start_brightness),
            end_brightness: end_brightness.filter(|_| brightness_changing),
            start_hs: start_hs.filter(|_| keep_hs),
            end_hs: end_hs.filter(|_| keep_hs),
            start_mireds: start_mireds.filter(|_| keep_mireds),
            end_mireds: end_mireds.filter(|_| keep_mireds),
            transition_ms: params.transition_ms,
            min_step_delay_ms: light.min_step_delay_ms,
            min_brightness,
            easing,
            dimmable: true,
            hybrid,
            from_step,
        })
    }

    pub fn easing(&self) -> Easing {
        self.easing
    }

    pub fn from_step(&self) -> Option<FadeStep> {
        self.from_step
    }

    fn has_fade(&self) -> bool {
        self.end_brightness.is_some() || self.end_hs.is_some() || self.end_mireds.is_some()
    }

    /// Number of steps: enough for the smoothest changing dimension, capped
    /// so that no step is shorter than the minimum step delay.
    pub fn step_count(&self) -> usize {
        if !self.has_fade() {
            return 0;
        }

        let mut ideal: Vec<u64> = Vec::new();

        if let (Some(start), Some(end)) = (self.start_brightness, self.end_brightness) {
            let change = u32::from(start.abs_diff(end));
            if change > 0 {
                ideal.push(u64::from(change / MIN_BRIGHTNESS_DELTA));
            }
        }

        match self.hybrid {
            Some(Hybrid::HsToMireds {
                crossover_hs,
                crossover_mireds,
            }) => {
                if let Some(start) = self.start_hs {
                    hs_ideal_steps(&mut ideal, start, crossover_hs);
                }
                if let Some(end) = self.end_mireds {
                    mireds_ideal_steps(&mut ideal, crossover_mireds, end);
                }
            }
            Some(Hybrid::MiredsToHs {
                crossover_hs,
                crossover_mireds,
            }) => {
                if let Some(start) = self.start_mireds {
                    mireds_ideal_steps(&mut ideal, start, crossover_mireds);
                }
                if let Some(end) = self.end_hs {
                    hs_ideal_steps(&mut ideal, crossover_hs, end);
                }
            }
            None => {
                if let (Some(start), Some(end)) = (self.start_hs, self.end_hs) {
                    hs_ideal_steps(&mut ideal, start, end);
                }
                if let (Some(start), Some(end)) = (self.start_mireds, self.end_mireds) {
                    mireds_ideal_steps(&mut ideal, start, end);
                }
            }
        }

        let ideal = ideal.into_iter().max().unwrap_or(1);
        let max_by_time = if self.min_step_delay_ms > 0 {
            u64::from(self.transition_ms) / self.min_step_delay_ms
        } else {
            ideal
        };

        ideal.min(max_by_time).max(1) as usize
    }

    /// Delay between steps, rounded up to the microsecond.
    pub fn step_delay(&self) -> Duration {
        match self.step_count() {
            0 => Duration::ZERO,
            count => {
                let micros = (u64::from(self.transition_ms) * 1000).div_ceil(count as u64);
                Duration::from_micros(micros)
            }
        }
    }

    fn start_values(&self) -> FadeStep {
        let color = match self.hybrid {
            Some(Hybrid::HsToMireds { .. }) => self.start_hs.map(LightColor::Hs),
            Some(Hybrid::MiredsToHs { .. }) => self.start_mireds.map(LightColor::ColorTemp),
            None => self
                .start_hs
                .map(LightColor::Hs)
                .or(self.start_mireds.map(LightColor::ColorTemp)),
        };
        FadeStep {
            brightness: self.start_brightness,
            color,
        }
    }

    /// Build the full step sequence.
    ///
    /// Consecutive identical steps are folded into one whose delay covers
    /// both, so the total duration is unchanged. The terminal step is always
    /// kept and always lands exactly on the end values.
    pub fn plan(&self) -> FadePlan {
        let count = self.step_count();
        let step_delay = self.step_delay();
        let crossover_step = (count as f64 * HYBRID_SOURCE_PHASE_RATIO) as usize;

        let mut steps: Vec<PlannedStep> = Vec::with_capacity(count);
        let mut previous = self.start_values();

        for index in 1..=count {
            let terminal = index == count;
            let t = index as f64 / count as f64;
            let values = FadeStep {
                brightness: self.brightness_at(t, terminal),
                color: self.color_at(index, t, crossover_step, terminal),
            };

            if let Some(last) = steps.last_mut() {
                if !terminal && last.values == values {
                    debug!("Folding duplicate step {}/{}: {:?}", index, count, values);
                    last.delay += step_delay;
                    continue;
                }
            }

            steps.push(PlannedStep {
                index,
                values,
                from: previous,
                terminal,
                delay: step_delay,
            });
            previous = values;
        }

        FadePlan {
            from_step: self.from_step,
            steps,
            step_delay,
            dimmable: self.dimmable,
        }
    }

    fn brightness_at(&self, t: f64, terminal: bool) -> Option<u8> {
        let (start, end) = (self.start_brightness?, self.end_brightness?);
        if terminal {
            return Some(end);
        }

        let eased = self.easing.apply(t);
        let exact = f64::from(start) + (f64::from(end) - f64::from(start)) * eased;
        let ascending = end > start;
        let value = if ascending { exact.ceil() } else { exact.floor() };
        let value = value.clamp(0.0, 255.0) as u8;

        // Level 1 behaves oddly on many lights.
        Some(match value {
            1 if ascending => self.min_brightness.max(2).min(end),
            1 => 0,
            v => v,
        })
    }

    fn color_at(&self, index: usize, t: f64, crossover_step: usize, terminal: bool) -> Option<LightColor> {
        match self.hybrid {
            Some(Hybrid::HsToMireds {
                crossover_hs,
                crossover_mireds,
            }) => {
                let crossover_t = crossover_step as f64 / self.step_count() as f64;
                if index <= crossover_step && !terminal {
                    let phase = if crossover_t > 0.0 { t / crossover_t } else { 1.0 };
                    let start = self.start_hs?;
                    Some(LightColor::Hs(color::interpolate_hs(start, crossover_hs, phase)))
                } else {
                    let end = self.end_mireds?;
                    let phase = hybrid_second_phase(t, crossover_t, terminal);
                    Some(LightColor::ColorTemp(color::interpolate_mireds(
                        crossover_mireds,
                        end,
                        phase,
                    )))
                }
            }
            Some(Hybrid::MiredsToHs {
                crossover_hs,
                crossover_mireds,
            }) => {
                let crossover_t = crossover_step as f64 / self.step_count() as f64;
                if index <= crossover_step && !terminal {
                    let phase = if crossover_t > 0.0 { t / crossover_t } else { 1.0 };
                    let start = self.start_mireds?;
                    Some(LightColor::ColorTemp(color::interpolate_mireds(
                        start,
                        crossover_mireds,
                        phase,
                    )))
                } else {
                    let end = self.end_hs?;
                    let phase = hybrid_second_phase(t, crossover_t, terminal);
                    Some(LightColor::Hs(color::interpolate_hs(crossover_hs, end, phase)))
                }
            }
            None => {
                if let (Some(start), Some(end)) = (self.start_hs, self.end_hs) {
                    let hs = if terminal {
                        end
                    } else {
                        color::interpolate_hs(start, end, t)
                    };
                    return Some(LightColor::Hs(hs));
                }
                if let (Some(start), Some(end)) = (self.start_mireds, self.end_mireds) {
                    let mireds = if terminal {
                        end
                    } else {
                        color::interpolate_mireds(start, end, t)
                    };
                    return Some(LightColor::ColorTemp(mireds));
                }
                None
            }
        }
    }
}

fn hybrid_second_phase(t: f64, crossover_t: f64, terminal: bool) -> f64 {
    if terminal {
        return 1.0;
    }
    let remaining = 1.0 - crossover_t;
    if remaining > 0.0 {
        (t - crossover_t) / remaining
    } else {
        1.0
    }
}

fn hs_ideal_steps(ideal: &mut Vec<u64>, start: Hs, end: Hs) {
    let hue = color::hue_distance(start.hue, end.hue);
    if hue > 0.0 {
        ideal.push((hue / MIN_HUE_DELTA) as u64);
    }
    let sat = (end.saturation - start.saturation).abs();
    if sat > 0.0 {
        ideal.push((sat / MIN_SATURATION_DELTA) as u64);
    }
}

fn mireds_ideal_steps(ideal: &mut Vec<u64>, start: u16, end: u16) {
    let change = u32::from(start.abs_diff(end));
    if change > 0 {
        ideal.push(u64::from(change / MIN_MIREDS_DELTA));
    }
}

/// Start/end colors after capability filtering.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ResolvedColors {
    start_hs: Option<Hs>,
    end_hs: Option<Hs>,
    start_mireds: Option<u16>,
    end_mireds: Option<u16>,
    min_mireds: Option<u16>,
    max_mireds: Option<u16>,
}

impl ResolvedColors {
    fn resolve(params: &FadeParams, snapshot: &LightSnapshot) -> Self {
        let caps = &snapshot.capabilities;
        let state = &snapshot.state;
        let (min_mireds, max_mireds) = (caps.min_mireds, caps.max_mireds);
        let clamp = |m: u16| color::clamp_mireds(m, min_mireds, max_mireds);
        let can_hs = caps.supports_hs();
        let can_ct = caps.supports_color_temp();

        let mut start_hs = match params.from.color {
            Some(ColorTarget::Kelvin(_)) => None,
            Some(ColorTarget::Hs(hs)) => Some(hs),
            None => state.hs(),
        };
        let mut start_mireds = match params.from.color {
            Some(ColorTarget::Hs(_)) => None,
            Some(ColorTarget::Kelvin(k)) => Some(color::kelvin_to_mireds(k)),
            None => state.mireds(),
        }
        .map(clamp);

        let mut end_hs = params.target.color.and_then(ColorTarget::hs);
        let mut end_mireds = params
            .target
            .color
            .and_then(ColorTarget::kelvin)
            .map(|k| clamp(color::kelvin_to_mireds(k)));

        if let Some(mireds) = end_mireds {
            if !can_ct && can_hs {
                end_hs = Some(color::mireds_to_hs(mireds));
                end_mireds = None;
            }
        }
        if let Some(hs) = end_hs {
            if !can_hs && can_ct {
                if color::is_on_planckian_locus(hs) {
                    end_mireds = Some(clamp(color::hs_to_mireds(hs)));
                }
                end_hs = None;
            }
        }

        if !can_hs {
            start_hs = None;
            end_hs = None;
        }
        if !can_ct {
            start_mireds = None;
            end_mireds = None;
        }

        if let (Some(hs), None, Some(_)) = (start_hs, start_mireds, end_mireds) {
            if color::is_on_planckian_locus(hs) {
                let mireds = clamp(color::hs_to_mireds(hs));
                debug!("Start color {} is on the locus, starting from {} mireds", hs, mireds);
                start_mireds = Some(mireds);
                start_hs = None;
            }
        }

        Self {
            start_hs,
            end_hs,
            start_mireds,
            end_mireds,
            min_mireds,
            max_mireds,
        }
    }
}

fn auto_turn_on_brightness(
    start_brightness: u8,
    end_brightness: Option<u8>,
    colors: &ResolvedColors,
    state: &LightState,
    min_brightness: u8,
    stored_original: u8,
) -> Option<u8> {
    if end_brightness.is_some() {
        return end_brightness;
    }
    if colors.end_hs.is_none() && colors.end_mireds.is_none() {
        return None;
    }

    let off_or_dim = state
        .observed_brightness()
        .is_none_or(|b| b < min_brightness);
    if start_brightness != min_brightness || !off_or_dim {
        return None;
    }

    let target = if stored_original > min_brightness {
        stored_original
    } else {
        255
    };
    debug!("Color fade from off, turning on to brightness {}", target);
    Some(target.max(min_brightness))
}

fn detect_hybrid(
    start_hs: Option<Hs>,
    end_hs: Option<Hs>,
    start_mireds: Option<u16>,
    end_mireds: Option<u16>,
    min_mireds: Option<u16>,
    max_mireds: Option<u16>,
) -> Option<Hybrid> {
    let clamp = |m: u16| color::clamp_mireds(m, min_mireds, max_mireds);
    match (start_hs, end_hs, start_mireds, end_mireds) {
        (Some(start), None, None, Some(end)) if !color::is_on_planckian_locus(start) => {
            let crossover_hs = color::mireds_to_hs(end);
            Some(Hybrid::HsToMireds {
                crossover_hs,
                crossover_mireds: clamp(color::hs_to_mireds(crossover_hs)),
            })
        }
        (None, Some(end), Some(_), None) => {
            let crossover_mireds = clamp(color::hs_to_mireds(end));
            Some(Hybrid::MiredsToHs {
                crossover_hs: color::mireds_to_hs(crossover_mireds),
                crossover_mireds,
            })
        }
        _ => None,
    }
}

/// Step applying the request's explicit starting values, limited to the
/// dimensions where they differ from what the light is already showing.
fn build_from_step(
    params: &FadeParams,
    snapshot: &LightSnapshot,
    min_brightness: u8,
) -> Option<FadeStep> {
    let caps = &snapshot.capabilities;
    let state = &snapshot.state;
    let actual_brightness = if state.on { state.brightness } else { None };

    let brightness = params
        .from
        .brightness
        .map(|b| b.to_raw(min_brightness).max(min_brightness))
        .filter(|b| actual_brightness != Some(*b));

    let color = match params.from.color {
        Some(ColorTarget::Hs(hs)) if caps.supports_hs() => {
            (state.hs() != Some(hs)).then_some(LightColor::Hs(hs))
        }
        Some(ColorTarget::Kelvin(k)) if caps.supports_color_temp() => {
            let mireds =
                color::clamp_mireds(color::kelvin_to_mireds(k), caps.min_mireds, caps.max_mireds);
            (state.mireds() != Some(mireds)).then_some(LightColor::ColorTemp(mireds))
        }
        _ => None,
    };

    if brightness.is_none() && color.is_none() {
        return None;
    }
    Some(FadeStep { brightness, color })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Capabilities;
    use crate::engine::ColorMode;
    use crate::fade::params::BrightnessTarget;
    use crate::fade::params::FadeValues;

    fn light() -> LightParams {
        LightParams {
            min_step_delay_ms: 100,
            min_brightness: 2,
            native_transitions: false,
        }
    }

    fn snapshot(state: LightState, modes: &[ColorMode]) -> LightSnapshot {
        LightSnapshot {
            state,
            capabilities: Capabilities::new(modes.iter().copied()).with_mireds_range(153, 500),
        }
    }

    fn on_at(brightness: u8) -> LightState {
        LightState {
            on: true,
            brightness: Some(brightness),
            color: None,
        }
    }

    fn brightness_params(target: BrightnessTarget, transition_ms: u32) -> FadeParams {
        FadeParams::new(
            FadeValues {
                brightness: Some(target),
                color: None,
            },
            transition_ms,
        )
    }

    fn brightness_plan(start: u8, end: u8, transition_ms: u32, easing: Easing) -> FadePlan {
        let endpoints = Endpoints {
            brightness: Some((start, end)),
            ..Default::default()
        };
        FadeChange::between(endpoints, transition_ms, &light(), easing).plan()
    }

    fn brightnesses(plan: &FadePlan) -> Vec<u8> {
        plan.steps
            .iter()
            .filter_map(|s| s.values.brightness)
            .collect()
    }

    #[test]
    fn test_identical_endpoints_plan_nothing() {
        let endpoints = Endpoints {
            brightness: Some((100, 100)),
            hs: Some((Hs::new(10.0, 10.0), Hs::new(10.0, 10.0))),
            mireds: None,
        };
        let change = FadeChange::between(endpoints, 5000, &light(), Easing::Auto);
        assert_eq!(change.step_count(), 0);
        assert!(change.plan().is_empty());

        let snap = snapshot(on_at(100), &[ColorMode::Hs]);
        let params = brightness_params(BrightnessTarget::Raw(100), 5000);
        assert!(FadeChange::resolve(&params, &snap, &light(), 0).is_none());
    }

    #[test]
    fn test_step_count_limited_by_time() {
        let plan = brightness_plan(204, 0, 5000, Easing::Linear);
        assert_eq!(plan.steps.len(), 50);
        assert_eq!(plan.step_delay, Duration::from_millis(100));
        assert_eq!(plan.total_delay(), Duration::from_millis(5000));
    }

    #[test]
    fn test_step_count_limited_by_change() {
        let change = FadeChange::between(
            Endpoints {
                brightness: Some((100, 110)),
                ..Default::default()
            },
            10_000,
            &light(),
            Easing::Linear,
        );
        assert_eq!(change.step_count(), 10);
        assert_eq!(change.step_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_mireds_step_count_uses_coarser_delta() {
        let change = FadeChange::between(
            Endpoints {
                mireds: Some((200, 300)),
                ..Default::default()
            },
            60_000,
            &light(),
            Easing::Auto,
        );
        assert_eq!(change.step_count(), 20);
    }

    #[test]
    fn test_zero_transition_is_single_step() {
        let plan = brightness_plan(10, 200, 0, Easing::Auto);
        assert_eq!(brightnesses(&plan), vec![200]);
        assert_eq!(plan.step_delay, Duration::ZERO);
        assert!(plan.steps[0].terminal);
    }

    #[test]
    fn test_terminal_step_is_exact() {
        for (start, end) in [(3, 254), (254, 3), (17, 200), (200, 17)] {
            for easing in [Easing::Linear, Easing::EaseInCubic, Easing::EaseOutQuad] {
                let plan = brightness_plan(start, end, 2300, easing);
                let last = plan.steps.last().unwrap();
                assert!(last.terminal);
                assert_eq!(last.values.brightness, Some(end));
            }
        }
    }

    #[test]
    fn test_rounds_away_from_start() {
        let plan = brightness_plan(0, 10, 300, Easing::Linear);
        // 3 steps: 3.33 -> 4, 6.67 -> 7, 10
        assert_eq!(brightnesses(&plan), vec![4, 7, 10]);

        let plan = brightness_plan(10, 0, 300, Easing::Linear);
        // 6.67 -> 6, 3.33 -> 3, 0
        assert_eq!(brightnesses(&plan), vec![6, 3, 0]);
    }

    #[test]
    fn test_descending_never_emits_one() {
        let plan = brightness_plan(204, 0, 5000, Easing::Auto);
        let values = brightnesses(&plan);
        assert!(!values.contains(&1));
        assert_eq!(values.last(), Some(&0));
    }

    #[test]
    fn test_ascending_through_one_uses_floor() {
        let plan = brightness_plan(0, 100, 10_000, Easing::Linear);
        let values = brightnesses(&plan);
        assert_eq!(values[0], 2);
        assert!(!values.contains(&1));

        let mut custom = light();
        custom.min_brightness = 5;
        let plan = FadeChange::between(
            Endpoints {
                brightness: Some((0, 100)),
                ..Default::default()
            },
            10_000,
            &custom,
            Easing::Linear,
        )
        .plan();
        assert_eq!(plan.steps[0].values.brightness, Some(5));
    }

    #[test]
    fn test_duplicate_steps_are_folded() {
        let plan = brightness_plan(250, 255, 10_000, Easing::EaseInCubic);
        let values = brightnesses(&plan);
        let mut deduped = values.clone();
        deduped.dedup();
        assert_eq!(values, deduped);
        assert_eq!(plan.total_delay(), Duration::from_secs(10));
        assert_eq!(values.last(), Some(&255));
    }

    #[test]
    fn test_uneven_delay_rounds_up() {
        let plan = brightness_plan(100, 103, 1000, Easing::Linear);
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.step_delay, Duration::from_micros(333_334));
        assert!(plan.total_delay() >= Duration::from_secs(1));
    }

    #[test]
    fn test_hue_takes_shortest_arc() {
        let plan = FadeChange::between(
            Endpoints {
                hs: Some((Hs::new(350.0, 100.0), Hs::new(10.0, 100.0))),
                ..Default::default()
            },
            2000,
            &light(),
            Easing::Auto,
        )
        .plan();
        assert_eq!(plan.steps.len(), 20);
        for step in &plan.steps {
            let Some(LightColor::Hs(hs)) = step.values.color else {
                panic!("expected hs step");
            };
            assert!(hs.hue >= 350.0 || hs.hue <= 10.0, "hue {}", hs.hue);
        }
        assert_eq!(
            plan.steps[9].values.color,
            Some(LightColor::Hs(Hs::new(0.0, 100.0)))
        );
    }

    #[test]
    fn test_steps_remember_where_they_came_from() {
        let plan = brightness_plan(100, 110, 10_000, Easing::Linear);
        assert_eq!(plan.steps[0].from.brightness, Some(100));
        assert_eq!(plan.steps[1].from.brightness, Some(101));
    }

    #[test]
    fn test_resolve_fade_to_off() {
        let snap = snapshot(on_at(204), &[ColorMode::Brightness]);
        let params = brightness_params(BrightnessTarget::Percent(0), 5000);
        let plan = FadeChange::resolve(&params, &snap, &light(), 0).unwrap().plan();
        assert!(plan.steps.len() <= 50);
        assert_eq!(plan.total_delay(), Duration::from_secs(5));
        assert_eq!(plan.final_brightness(), Some(0));
        assert_eq!(
            plan.steps.last().unwrap().values.command(plan.dimmable),
            LightCommand::off()
        );
    }

    #[test]
    fn test_resolve_clamps_end_to_min_brightness() {
        let mut custom = light();
        custom.min_brightness = 10;
        let snap = snapshot(on_at(200), &[ColorMode::Brightness]);
        let params = brightness_params(BrightnessTarget::Raw(3), 1000);
        let plan = FadeChange::resolve(&params, &snap, &custom, 0).unwrap().plan();
        assert_eq!(plan.final_brightness(), Some(10));

        let params = brightness_params(BrightnessTarget::Percent(1), 1000);
        let plan = FadeChange::resolve(&params, &snap, &custom, 0).unwrap().plan();
        assert_eq!(plan.final_brightness(), Some(10));
    }

    #[test]
    fn test_resolve_off_light_to_zero_is_noop() {
        let snap = snapshot(LightState::default(), &[ColorMode::Brightness]);
        let params = brightness_params(BrightnessTarget::Percent(0), 1000);
        assert!(FadeChange::resolve(&params, &snap, &light(), 0).is_none());
    }

    #[test]
    fn test_resolve_non_dimmable_light() {
        let snap = snapshot(LightState::default(), &[ColorMode::OnOff]);
        let params = brightness_params(BrightnessTarget::Percent(30), 5000);
        let plan = FadeChange::resolve(&params, &snap, &light(), 0).unwrap().plan();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.step_delay, Duration::ZERO);
        assert!(!plan.dimmable);
        let cmd = plan.steps[0].values.command(plan.dimmable);
        assert!(cmd.on);
        assert_eq!(cmd.brightness, None);

        let color_only = FadeParams::new(
            FadeValues {
                brightness: None,
                color: Some(ColorTarget::Kelvin(3000)),
            },
            1000,
        );
        assert!(FadeChange::resolve(&color_only, &snap, &light(), 0).is_none());
    }

    #[test]
    fn test_resolve_kelvin_on_hs_only_light_uses_locus() {
        let mut state = on_at(100);
        state.color = Some(LightColor::Hs(Hs::new(27.36, 48.52)));
        let snap = snapshot(state, &[ColorMode::Hs]);
        let params = FadeParams::new(
            FadeValues {
                brightness: None,
                color: Some(ColorTarget::Kelvin(4000)),
            },
            1000,
        );
        let plan = FadeChange::resolve(&params, &snap, &light(), 0).unwrap().plan();
        assert_eq!(
            plan.steps.last().unwrap().values.color,
            Some(LightColor::Hs(color::mireds_to_hs(250)))
        );
    }

    #[test]
    fn test_resolve_saturated_hs_on_ct_only_light_is_dropped() {
        let snap = snapshot(on_at(100), &[ColorMode::ColorTemp]);
        let params = FadeParams::new(
            FadeValues {
                brightness: None,
                color: Some(ColorTarget::Hs(Hs::new(240.0, 100.0))),
            },
            1000,
        );
        assert!(FadeChange::resolve(&params, &snap, &light(), 0).is_none());

        let white = FadeParams::new(
            FadeValues {
                brightness: None,
                color: Some(ColorTarget::Hs(Hs::new(28.75, 10.32))),
            },
            1000,
        );
        let plan = FadeChange::resolve(&white, &snap, &light(), 0).unwrap().plan();
        assert_eq!(
            plan.steps.last().unwrap().values.color,
            Some(LightColor::ColorTemp(175))
        );
    }

    #[test]
    fn test_resolve_clamps_mireds_and_starts_from_nearest_bound() {
        let snap = snapshot(on_at(100), &[ColorMode::ColorTemp]);
        let params = FadeParams::new(
            FadeValues {
                brightness: None,
                color: Some(ColorTarget::Kelvin(1000)),
            },
            10_000,
        );
        let plan = FadeChange::resolve(&params, &snap, &light(), 0).unwrap().plan();
        assert_eq!(plan.steps[0].from.color, Some(LightColor::ColorTemp(500)));
        // Clamped target equals the chosen start bound: nothing moves but the
        // single terminal step.
        assert_eq!(
            plan.steps.last().unwrap().values.color,
            Some(LightColor::ColorTemp(500))
        );

        let params = FadeParams::new(
            FadeValues {
                brightness: None,
                color: Some(ColorTarget::Kelvin(5000)),
            },
            10_000,
        );
        let plan = FadeChange::resolve(&params, &snap, &light(), 0).unwrap().plan();
        assert_eq!(plan.steps[0].from.color, Some(LightColor::ColorTemp(153)));
        assert_eq!(
            plan.steps.last().unwrap().values.color,
            Some(LightColor::ColorTemp(200))
        );
    }

    #[test]
    fn test_resolve_auto_turn_on() {
        let snap = snapshot(LightState::default(), &[ColorMode::Hs]);
        let params = FadeParams::new(
            FadeValues {
                brightness: None,
                color: Some(ColorTarget::Hs(Hs::new(120.0, 80.0))),
            },
            1000,
        );
        let plan = FadeChange::resolve(&params, &snap, &light(), 0).unwrap().plan();
        assert_eq!(plan.final_brightness(), Some(255));

        let plan = FadeChange::resolve(&params, &snap, &light(), 150).unwrap().plan();
        assert_eq!(plan.final_brightness(), Some(150));

        let lit = snapshot(on_at(80), &[ColorMode::Hs]);
        let plan = FadeChange::resolve(&params, &lit, &light(), 150).unwrap().plan();
        assert_eq!(plan.final_brightness(), None);
    }

    #[test]
    fn test_resolve_hs_to_mireds_hybrid() {
        let mut state = on_at(200);
        state.color = Some(LightColor::Hs(Hs::new(240.0, 100.0)));
        let snap = snapshot(state, &[ColorMode::Hs, ColorMode::ColorTemp]);
        let params = FadeParams::new(
            FadeValues {
                brightness: None,
                color: Some(ColorTarget::Kelvin(3333)),
            },
            10_000,
        );
        let change = FadeChange::resolve(&params, &snap, &light(), 0).unwrap();
        let count = change.step_count();
        let plan = change.plan();
        let crossover = (count as f64 * 0.7) as usize;

        for step in &plan.steps {
            match step.values.color {
                Some(LightColor::Hs(_)) => assert!(step.index <= crossover),
                Some(LightColor::ColorTemp(_)) => assert!(step.index > crossover),
                None => panic!("color missing"),
            }
        }
        assert_eq!(
            plan.steps.last().unwrap().values.color,
            Some(LightColor::ColorTemp(300))
        );
    }

    #[test]
    fn test_resolve_mireds_to_hs_hybrid() {
        let mut state = on_at(200);
        state.color = Some(LightColor::ColorTemp(370));
        let snap = snapshot(state, &[ColorMode::Hs, ColorMode::ColorTemp]);
        let target = Hs::new(120.0, 90.0);
        let params = FadeParams::new(
            FadeValues {
                brightness: None,
                color: Some(ColorTarget::Hs(target)),
            },
            10_000,
        );
        let plan = FadeChange::resolve(&params, &snap, &light(), 0).unwrap().plan();
        assert!(matches!(
            plan.steps[0].values.color,
            Some(LightColor::ColorTemp(_))
        ));
        assert_eq!(
            plan.steps.last().unwrap().values.color,
            Some(LightColor::Hs(target))
        );
    }

    #[test]
    fn test_resolve_from_step_only_when_different() {
        let snap = snapshot(on_at(50), &[ColorMode::Brightness]);
        let params = brightness_params(BrightnessTarget::Raw(200), 1000).with_from(FadeValues {
            brightness: Some(BrightnessTarget::Raw(50)),
            color: None,
        });
        let change = FadeChange::resolve(&params, &snap, &light(), 0).unwrap();
        assert_eq!(change.from_step(), None);

        let params = brightness_params(BrightnessTarget::Raw(200), 1000).with_from(FadeValues {
            brightness: Some(BrightnessTarget::Raw(10)),
            color: None,
        });
        let change = FadeChange::resolve(&params, &snap, &light(), 0).unwrap();
        assert_eq!(
            change.from_step(),
            Some(FadeStep {
                brightness: Some(10),
                color: None
            })
        );
        assert_eq!(change.plan().steps[0].from.brightness, Some(10));
    }

    #[test]
    fn test_resolve_from_only_request() {
        let snap = snapshot(on_at(50), &[ColorMode::Brightness]);
        let params = FadeParams::new(FadeValues::default(), 1000).with_from(FadeValues {
            brightness: Some(BrightnessTarget::Raw(80)),
            color: None,
        });
        let plan = FadeChange::resolve(&params, &snap, &light(), 0).unwrap().plan();
        assert!(plan.steps.is_empty());
        assert_eq!(
            plan.from_step,
            Some(FadeStep {
                brightness: Some(80),
                color: None
            })
        );
    }

    #[test]
    fn test_auto_easing_follows_direction() {
        let snap = snapshot(on_at(20), &[ColorMode::Brightness]);
        let up = brightness_params(BrightnessTarget::Raw(200), 1000);
        let change = FadeChange::resolve(&up, &snap, &light(), 0).unwrap();
        assert_eq!(change.easing(), Easing::EaseInQuad);

        let snap = snapshot(on_at(200), &[ColorMode::Brightness]);
        let down = brightness_params(BrightnessTarget::Raw(20), 1000);
        let change = FadeChange::resolve(&down, &snap, &light(), 0).unwrap();
        assert_eq!(change.easing(), Easing::EaseOutQuad);
    }
}
