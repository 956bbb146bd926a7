use serde::Deserialize;
use serde::Serialize;
use strum::Display;
use strum::EnumString;

/// Easing curve applied to brightness progress.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Easing {
    /// Pick a curve from the fade direction.
    #[default]
    Auto,
    Linear,
    EaseInQuad,
    EaseInCubic,
    EaseOutQuad,
    EaseOutCubic,
    EaseInOutSine,
}

impl Easing {
    /// Resolve `Auto` for a brightness change from `start` to `end`.
    ///
    /// Brightening accelerates and dimming decelerates, since the eye reads
    /// changes near the dark end as larger.
    pub fn resolve(self, start: u8, end: u8) -> Easing {
        match self {
            Easing::Auto if end > start => Easing::EaseInQuad,
            Easing::Auto if end < start => Easing::EaseOutQuad,
            Easing::Auto => Easing::Linear,
            other => other,
        }
    }

    /// Map linear progress `t` in `[0, 1]` onto the curve.
    pub fn apply(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Easing::Auto | Easing::Linear => t,
            Easing::EaseInQuad => t * t,
            Easing::EaseInCubic => t * t * t,
            Easing::EaseOutQuad => 1.0 - (1.0 - t) * (1.0 - t),
            Easing::EaseOutCubic => 1.0 - (1.0 - t).powi(3),
            Easing::EaseInOutSine => -((std::f64::consts::PI * t).cos() - 1.0) / 2.0,
        }
    }
}
