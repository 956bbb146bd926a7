//! Tracking of values the engine itself just commanded.
//!
//! Every command the engine issues is recorded here first. A state-change
//! notification that matches a live record is the echo of our own command;
//! anything else was caused by someone else.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use super::planner::FadeStep;
use crate::color;
use crate::color::Hs;
use crate::engine::LightColor;
use crate::engine::LightState;

/// How long a recorded value stays live.
pub const EXPECTATION_TTL: Duration = Duration::from_secs(3);

/// Default number of recorded values kept per light.
pub const DEFAULT_RETENTION: usize = 2;

const BRIGHTNESS_TOLERANCE: u8 = 3;
const HUE_TOLERANCE: f64 = 5.0;
const SATURATION_TOLERANCE: f64 = 3.0;
const KELVIN_TOLERANCE: u32 = 100;

/// Values expected to show up in a notification.
///
/// A `from_*` value turns the matching dimension into a range: the light is
/// transitioning natively and may report anything between `from` and the
/// target on its way there.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ExpectedValues {
    pub brightness: Option<u8>,
    pub hs: Option<Hs>,
    pub mireds: Option<u16>,
    pub from_brightness: Option<u8>,
    pub from_hs: Option<Hs>,
    pub from_mireds: Option<u16>,
}

/// Result of matching a notification against one expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Match {
    No,
    /// Landed on the target.
    Exact,
    /// Somewhere on the way from `from` to the target.
    InRange,
}

impl Match {
    fn and(self, other: Match) -> Match {
        match (self, other) {
            (Match::No, _) | (_, Match::No) => Match::No,
            (Match::InRange, _) | (_, Match::InRange) => Match::InRange,
            (Match::Exact, Match::Exact) => Match::Exact,
        }
    }
}

impl ExpectedValues {
    /// Expect the values a step drives the light to. An off step is
    /// brightness 0.
    pub fn from_step(step: &FadeStep) -> Self {
        let (hs, mireds) = match step.color {
            Some(LightColor::Hs(hs)) => (Some(hs), None),
            Some(LightColor::ColorTemp(m)) => (None, Some(m)),
            None => (None, None),
        };
        Self {
            brightness: step.brightness,
            hs,
            mireds,
            ..Default::default()
        }
    }

    /// Turn every dimension that `from` also carries into a range.
    pub fn with_from(mut self, from: &FadeStep) -> Self {
        if self.brightness.is_some() {
            self.from_brightness = from.brightness;
        }
        match from.color {
            Some(LightColor::Hs(hs)) if self.hs.is_some() => self.from_hs = Some(hs),
            Some(LightColor::ColorTemp(m)) if self.mireds.is_some() => {
                self.from_mireds = Some(m)
            }
            _ => {}
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.brightness.is_none() && self.hs.is_none() && self.mireds.is_none()
    }

    fn matches(&self, old: &LightState, new: &LightState) -> Match {
        if self.is_empty() {
            return Match::No;
        }

        let mut result = Match::Exact;

        if let Some(target) = self.brightness {
            result = result.and(match_brightness(
                target,
                self.from_brightness,
                old.observed_brightness(),
                new.observed_brightness(),
            ));
        }
        if let Some(target) = self.hs {
            result = result.and(match_hs(target, self.from_hs, old.hs(), new.hs()));
        }
        if let Some(target) = self.mireds {
            result = result.and(match_kelvin(
                color::mireds_to_kelvin(target),
                self.from_mireds.map(color::mireds_to_kelvin),
                old.mireds().map(color::mireds_to_kelvin),
                new.mireds().map(color::mireds_to_kelvin),
            ));
        }

        result
    }
}

fn match_brightness(target: u8, from: Option<u8>, old: Option<u8>, new: Option<u8>) -> Match {
    let Some(new) = new else {
        return Match::No;
    };
    if new.abs_diff(target) <= BRIGHTNESS_TOLERANCE {
        return Match::Exact;
    }
    let Some(from) = from else {
        return Match::No;
    };
    let lo = from.min(target).saturating_sub(BRIGHTNESS_TOLERANCE);
    let hi = from.max(target).saturating_add(BRIGHTNESS_TOLERANCE);
    let in_range = |v: u8| (lo..=hi).contains(&v);
    match old {
        Some(old) if in_range(old) && in_range(new) => Match::InRange,
        _ => Match::No,
    }
}

fn match_kelvin(target: u32, from: Option<u32>, old: Option<u32>, new: Option<u32>) -> Match {
    let Some(new) = new else {
        return Match::No;
    };
    if new.abs_diff(target) <= KELVIN_TOLERANCE {
        return Match::Exact;
    }
    let Some(from) = from else {
        return Match::No;
    };
    let lo = from.min(target).saturating_sub(KELVIN_TOLERANCE);
    let hi = from.max(target).saturating_add(KELVIN_TOLERANCE);
    let in_range = |v: u32| (lo..=hi).contains(&v);
    match old {
        Some(old) if in_range(old) && in_range(new) => Match::InRange,
        _ => Match::No,
    }
}

/// Whether `hue` lies on the shorter arc from `from` to `to`, with tolerance.
fn hue_in_arc(hue: f64, from: f64, to: f64) -> bool {
    let span = color::hue_delta(from, to);
    let offset = color::hue_delta(from, hue);
    if span >= 0.0 {
        (-HUE_TOLERANCE..=span + HUE_TOLERANCE).contains(&offset)
    } else {
        (span - HUE_TOLERANCE..=HUE_TOLERANCE).contains(&offset)
    }
}

fn saturation_in_range(sat: f64, from: f64, to: f64) -> bool {
    (from.min(to) - SATURATION_TOLERANCE..=from.max(to) + SATURATION_TOLERANCE).contains(&sat)
}

fn match_hs(target: Hs, from: Option<Hs>, old: Option<Hs>, new: Option<Hs>) -> Match {
    let Some(new) = new else {
        return Match::No;
    };
    if color::hue_distance(new.hue, target.hue) <= HUE_TOLERANCE
        && (new.saturation - target.saturation).abs() <= SATURATION_TOLERANCE
    {
        return Match::Exact;
    }
    let (Some(from), Some(old)) = (from, old) else {
        return Match::No;
    };
    let in_range = |hs: Hs| {
        hue_in_arc(hs.hue, from.hue, target.hue)
            && saturation_in_range(hs.saturation, from.saturation, target.saturation)
    };
    if in_range(old) && in_range(new) {
        Match::InRange
    } else {
        Match::No
    }
}

impl std::fmt::Display for ExpectedValues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if let Some(b) = self.brightness {
            parts.push(match self.from_brightness {
                Some(from) => format!("brightness={from}->{b}"),
                None => format!("brightness={b}"),
            });
        }
        if let Some(hs) = self.hs {
            parts.push(match self.from_hs {
                Some(from) => format!("hs_color={from}->{hs}"),
                None => format!("hs_color={hs}"),
            });
        }
        if let Some(m) = self.mireds {
            parts.push(match self.from_mireds {
                Some(from) => format!("mireds={from}->{m}"),
                None => format!("mireds={m}"),
            });
        }
        if parts.is_empty() {
            f.write_str("(empty)")
        } else {
            write!(f, "({})", parts.join(", "))
        }
    }
}

/// How a notification relates to what we commanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Echo of our own command; the expectation has been consumed.
    Expected,
    /// Intermediate value of a native transition we started.
    InTransition,
    /// Someone else changed the light.
    Unexpected,
}

impl Classification {
    pub fn is_expected(self) -> bool {
        !matches!(self, Classification::Unexpected)
    }
}

#[derive(Debug, Clone)]
struct Expectation {
    values: ExpectedValues,
    recorded_at: Instant,
}

/// Per-light record of recently commanded values.
#[derive(Debug)]
pub struct ExpectationTracker {
    retention: usize,
    ttl: Duration,
    lights: HashMap<String, VecDeque<Expectation>>,
}

impl Default for ExpectationTracker {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl ExpectationTracker {
    pub fn new(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
            ttl: EXPECTATION_TTL,
            lights: HashMap::new(),
        }
    }

    /// Remember that `values` were just commanded, evicting the oldest entry
    /// beyond the retention count.
    pub fn record(&mut self, light_id: &str, values: ExpectedValues, now: Instant) {
        if values.is_empty() {
            return;
        }
        let entries = self.lights.entry(light_id.to_string()).or_default();
        entries.push_back(Expectation {
            values,
            recorded_at: now,
        });
        while entries.len() > self.retention {
            entries.pop_front();
        }
    }

    /// Classify a notification. An exact match consumes the entry it matched.
    pub fn classify(
        &mut self,
        light_id: &str,
        old: &LightState,
        new: &LightState,
        now: Instant,
    ) -> Classification {
        let ttl = self.ttl;
        let Some(entries) = self.lights.get_mut(light_id) else {
            return Classification::Unexpected;
        };
        entries.retain(|e| now.saturating_duration_since(e.recorded_at) < ttl);

        let mut result = Classification::Unexpected;
        let mut consumed = None;
        for (i, entry) in entries.iter().enumerate() {
            match entry.values.matches(old, new) {
                Match::Exact => {
                    consumed = Some(i);
                    result = Classification::Expected;
                    break;
                }
                Match::InRange => {
                    result = Classification::InTransition;
                    break;
                }
                Match::No => {}
            }
        }

        if let Some(i) = consumed {
            entries.remove(i);
        }
        if entries.is_empty() {
            self.lights.remove(light_id);
        }
        result
    }

    /// Whether a notification matches a live expectation.
    pub fn is_expected(
        &mut self,
        light_id: &str,
        old: &LightState,
        new: &LightState,
        now: Instant,
    ) -> bool {
        self.classify(light_id, old, new, now).is_expected()
    }

    /// Drop expired entries for every light.
    pub fn prune(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.lights.retain(|_, entries| {
            entries.retain(|e| now.saturating_duration_since(e.recorded_at) < ttl);
            !entries.is_empty()
        });
    }

    /// Live and not-yet-pruned entries for a light.
    pub fn count(&self, light_id: &str) -> usize {
        self.lights.get(light_id).map_or(0, VecDeque::len)
    }

    pub fn clear(&mut self, light_id: &str) {
        self.lights.remove(light_id);
    }

    pub fn clear_all(&mut self) {
        self.lights.clear();
    }
}
