//! Fade request parameters: the loosely typed input accepted from callers and
//! the validated, normalised `FadeParams` the planner works with.

use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::color;
use crate::color::Hs;
use crate::easing::Easing;

pub const MAX_TRANSITION_S: f64 = 3600.0;
pub const MIN_KELVIN: u32 = 1000;
pub const MAX_KELVIN: u32 = 40000;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParamsError {
    #[error("{field} must be within {range}, got {value}")]
    OutOfRange {
        field: &'static str,
        range: &'static str,
        value: String,
    },

    #[error("{0} and {1} cannot be combined")]
    Conflict(&'static str, &'static str),

    #[error("unknown easing {0:?}")]
    UnknownEasing(String),
}

/// Requested brightness, as given by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrightnessTarget {
    /// 0-100
    Percent(u8),
    /// 1-255
    Raw(u8),
}

impl BrightnessTarget {
    /// Raw 0-255 brightness for a light whose dimmest real level is
    /// `min_brightness`.
    pub fn to_raw(self, min_brightness: u8) -> u8 {
        match self {
            BrightnessTarget::Raw(raw) => raw,
            BrightnessTarget::Percent(pct) => pct_to_brightness(pct, min_brightness),
        }
    }
}

/// `pct * 255 / 100`, truncated. 1% means "dimmest possible" and maps to
/// `min_brightness` when that is higher.
pub fn pct_to_brightness(pct: u8, min_brightness: u8) -> u8 {
    let raw = (u32::from(pct.min(100)) * 255 / 100) as u8;
    if pct == 1 && min_brightness > raw {
        min_brightness
    } else {
        raw
    }
}

/// Requested color. Every RGB-family input is normalised to HS; color
/// temperature stays in kelvin until planning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColorTarget {
    Hs(Hs),
    Kelvin(u32),
}

impl ColorTarget {
    pub fn hs(self) -> Option<Hs> {
        match self {
            ColorTarget::Hs(hs) => Some(hs),
            ColorTarget::Kelvin(_) => None,
        }
    }

    pub fn kelvin(self) -> Option<u32> {
        match self {
            ColorTarget::Kelvin(k) => Some(k),
            ColorTarget::Hs(_) => None,
        }
    }
}

/// One set of brightness/color values: either the fade target or its
/// explicit starting point.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FadeValues {
    pub brightness: Option<BrightnessTarget>,
    pub color: Option<ColorTarget>,
}

impl FadeValues {
    pub fn is_empty(&self) -> bool {
        self.brightness.is_none() && self.color.is_none()
    }
}

/// Normalised fade request for one or more lights.
#[derive(Debug, Clone, PartialEq)]
pub struct FadeParams {
    pub target: FadeValues,
    pub from: FadeValues,
    pub transition_ms: u32,
    pub easing: Easing,
}

impl FadeParams {
    pub fn new(target: FadeValues, transition_ms: u32) -> Self {
        Self {
            target,
            from: FadeValues::default(),
            transition_ms,
            easing: Easing::Auto,
        }
    }

    pub fn with_from(mut self, from: FadeValues) -> Self {
        self.from = from;
        self
    }

    pub fn with_easing(mut self, easing: Easing) -> Self {
        self.easing = easing;
        self
    }

    /// Nothing to fade to and nothing to start from.
    pub fn is_noop(&self) -> bool {
        self.target.is_empty() && self.from.is_empty()
    }
}

/// Brightness/color fields as they arrive over the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FadeValuesInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness_pct: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hs_color: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rgb_color: Option<[u32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rgbw_color: Option<[u32; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rgbww_color: Option<[u32; 5]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xy_color: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_temp_kelvin: Option<u32>,
}

/// A fade request as it arrives over the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FadeRequestInput {
    #[serde(flatten)]
    pub target: FadeValuesInput,

    /// Seconds, fractional allowed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub easing: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<FadeValuesInput>,
}

fn out_of_range(field: &'static str, range: &'static str, value: impl ToString) -> ParamsError {
    ParamsError::OutOfRange {
        field,
        range,
        value: value.to_string(),
    }
}

fn channel(field: &'static str, value: u32) -> Result<u8, ParamsError> {
    u8::try_from(value).map_err(|_| out_of_range(field, "0..=255", value))
}

fn channels<const N: usize>(field: &'static str, values: [u32; N]) -> Result<[u8; N], ParamsError> {
    let mut out = [0u8; N];
    for (slot, value) in out.iter_mut().zip(values) {
        *slot = channel(field, value)?;
    }
    Ok(out)
}

impl FadeValuesInput {
    pub fn into_values(self) -> Result<FadeValues, ParamsError> {
        let brightness = match (self.brightness_pct, self.brightness) {
            (Some(_), Some(_)) => return Err(ParamsError::Conflict("brightness_pct", "brightness")),
            (Some(pct), None) if pct <= 100 => Some(BrightnessTarget::Percent(pct as u8)),
            (Some(pct), None) => return Err(out_of_range("brightness_pct", "0..=100", pct)),
            (None, Some(raw)) if (1..=255).contains(&raw) => Some(BrightnessTarget::Raw(raw as u8)),
            (None, Some(raw)) => return Err(out_of_range("brightness", "1..=255", raw)),
            (None, None) => None,
        };

        let mut colors: Vec<(&'static str, ColorTarget)> = Vec::new();
        if let Some([hue, sat]) = self.hs_color {
            if !(0.0..=360.0).contains(&hue) {
                return Err(out_of_range("hs_color", "0..=360", hue));
            }
            if !(0.0..=100.0).contains(&sat) {
                return Err(out_of_range("hs_color", "0..=100", sat));
            }
            colors.push(("hs_color", ColorTarget::Hs(Hs::new(hue, sat))));
        }
        if let Some(rgb) = self.rgb_color {
            let [r, g, b] = channels("rgb_color", rgb)?;
            colors.push(("rgb_color", ColorTarget::Hs(color::rgb_to_hs(r, g, b))));
        }
        if let Some(rgbw) = self.rgbw_color {
            let [r, g, b, w] = channels("rgbw_color", rgbw)?;
            colors.push(("rgbw_color", ColorTarget::Hs(color::rgbw_to_hs(r, g, b, w))));
        }
        if let Some(rgbww) = self.rgbww_color {
            let [r, g, b, cw, ww] = channels("rgbww_color", rgbww)?;
            colors.push((
                "rgbww_color",
                ColorTarget::Hs(color::rgbww_to_hs(r, g, b, cw, ww)),
            ));
        }
        if let Some([x, y]) = self.xy_color {
            if !(0.0..=1.0).contains(&x) || !(0.0..=1.0).contains(&y) {
                return Err(out_of_range("xy_color", "0..=1", format!("[{x}, {y}]")));
            }
            colors.push(("xy_color", ColorTarget::Hs(color::xy_to_hs(x, y))));
        }
        if let Some(kelvin) = self.color_temp_kelvin {
            if !(MIN_KELVIN..=MAX_KELVIN).contains(&kelvin) {
                return Err(out_of_range("color_temp_kelvin", "1000..=40000", kelvin));
            }
            colors.push(("color_temp_kelvin", ColorTarget::Kelvin(kelvin)));
        }

        let color = match colors.as_slice() {
            [] => None,
            [(_, color)] => Some(*color),
            [(a, _), (b, _), ..] => return Err(ParamsError::Conflict(*a, *b)),
        };

        Ok(FadeValues { brightness, color })
    }
}

impl FadeRequestInput {
    /// Validate and normalise, filling in the configured defaults.
    pub fn into_params(
        self,
        default_transition_ms: u32,
        default_easing: Easing,
    ) -> Result<FadeParams, ParamsError> {
        let transition_ms = match self.transition {
            Some(s) if s.is_finite() && (0.0..=MAX_TRANSITION_S).contains(&s) => {
                (s * 1000.0).round() as u32
            }
            Some(s) => return Err(out_of_range("transition", "0..=3600", s)),
            None => default_transition_ms,
        };

        let easing = match self.easing {
            Some(name) => Easing::from_str(&name).map_err(|_| ParamsError::UnknownEasing(name))?,
            None => default_easing,
        };

        let target = self.target.into_values()?;
        let from = match self.from {
            Some(from) => from.into_values()?,
            None => FadeValues::default(),
        };

        Ok(FadeParams {
            target,
            from,
            transition_ms,
            easing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<FadeParams, ParamsError> {
        let input: FadeRequestInput = serde_json::from_str(json).unwrap();
        input.into_params(3000, Easing::Auto)
    }

    #[test]
    fn test_pct_to_brightness() {
        assert_eq!(pct_to_brightness(100, 2), 255);
        assert_eq!(pct_to_brightness(50, 2), 127);
        assert_eq!(pct_to_brightness(80, 2), 204);
        assert_eq!(pct_to_brightness(0, 2), 0);
        assert_eq!(pct_to_brightness(1, 2), 2);
        assert_eq!(pct_to_brightness(1, 10), 10);
        assert_eq!(pct_to_brightness(1, 1), 2);
    }

    #[test]
    fn test_defaults_applied() {
        let params = parse(r#"{"brightness_pct": 40}"#).unwrap();
        assert_eq!(params.transition_ms, 3000);
        assert_eq!(params.easing, Easing::Auto);
        assert_eq!(params.target.brightness, Some(BrightnessTarget::Percent(40)));
        assert!(params.from.is_empty());
        assert!(!params.is_noop());
    }

    #[test]
    fn test_fractional_transition() {
        let params = parse(r#"{"brightness": 10, "transition": 1.5, "easing": "linear"}"#).unwrap();
        assert_eq!(params.transition_ms, 1500);
        assert_eq!(params.easing, Easing::Linear);
        assert_eq!(params.target.brightness, Some(BrightnessTarget::Raw(10)));

        let params = parse(r#"{"brightness": 10, "transition": 4.35}"#).unwrap();
        assert_eq!(params.transition_ms, 4350);
    }

    #[test]
    fn test_colors_normalised_to_hs() {
        let params = parse(r#"{"rgb_color": [0, 0, 255]}"#).unwrap();
        let hs = params.target.color.and_then(ColorTarget::hs).unwrap();
        assert!((hs.hue - 240.0).abs() < 0.01);

        let params = parse(r#"{"color_temp_kelvin": 2700}"#).unwrap();
        assert_eq!(params.target.color, Some(ColorTarget::Kelvin(2700)));
    }

    #[test]
    fn test_from_values() {
        let params = parse(r#"{"brightness_pct": 100, "from": {"brightness": 20, "hs_color": [10, 20]}}"#)
            .unwrap();
        assert_eq!(params.from.brightness, Some(BrightnessTarget::Raw(20)));
        assert_eq!(
            params.from.color,
            Some(ColorTarget::Hs(Hs::new(10.0, 20.0)))
        );
    }

    #[test]
    fn test_empty_request_is_noop() {
        assert!(parse("{}").unwrap().is_noop());
    }

    #[test]
    fn test_rejects_conflicts_and_ranges() {
        assert_eq!(
            parse(r#"{"brightness_pct": 10, "brightness": 10}"#),
            Err(ParamsError::Conflict("brightness_pct", "brightness"))
        );
        assert_eq!(
            parse(r#"{"hs_color": [0, 0], "color_temp_kelvin": 3000}"#),
            Err(ParamsError::Conflict("hs_color", "color_temp_kelvin"))
        );
        assert!(matches!(
            parse(r#"{"brightness_pct": 101}"#),
            Err(ParamsError::OutOfRange { field: "brightness_pct", .. })
        ));
        assert!(matches!(
            parse(r#"{"brightness": 0}"#),
            Err(ParamsError::OutOfRange { field: "brightness", .. })
        ));
        assert!(matches!(
            parse(r#"{"color_temp_kelvin": 500}"#),
            Err(ParamsError::OutOfRange { .. })
        ));
        assert!(matches!(
            parse(r#"{"rgb_color": [256, 0, 0]}"#),
            Err(ParamsError::OutOfRange { field: "rgb_color", .. })
        ));
        assert!(matches!(
            parse(r#"{"transition": 3601}"#),
            Err(ParamsError::OutOfRange { field: "transition", .. })
        ));
        assert_eq!(
            parse(r#"{"easing": "bounce"}"#),
            Err(ParamsError::UnknownEasing("bounce".to_string()))
        );
    }

    #[test]
    fn test_error_messages() {
        let err = parse(r#"{"brightness_pct": 150}"#).unwrap_err();
        insta::assert_snapshot!(err, @"brightness_pct must be within 0..=100, got 150");
    }
}
