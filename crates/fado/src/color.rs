//! Color math: hue/saturation conversions, color temperature and the
//! Planckian locus approximation used to cross between the two color models.
//!
//! Everything here is pure. Hue is in degrees `[0, 360)`, saturation in
//! percent `[0, 100]`, color temperature in mireds unless a name says kelvin.

use palette::convert::FromColorUnclamped;
use palette::white_point::D65;
use palette::FromColor;
use palette::Hsv;
use palette::LinSrgb;
use palette::Srgb;
use palette::Xyz;
use palette::Yxy;
use serde::Deserialize;
use serde::Serialize;

/// A hue/saturation pair.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Hs {
    pub hue: f64,
    pub saturation: f64,
}

impl Hs {
    pub const WHITE: Hs = Hs {
        hue: 0.0,
        saturation: 0.0,
    };

    pub fn new(hue: f64, saturation: f64) -> Self {
        Self { hue, saturation }
    }
}

impl std::fmt::Display for Hs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.1}, {:.1})", self.hue, self.saturation)
    }
}

/// Saturation at or below which a color counts as "white enough" to be
/// expressed as a color temperature.
pub const PLANCKIAN_LOCUS_SATURATION_THRESHOLD: f64 = 15.0;

/// Mireds reported for a color too unsaturated to carry a usable hue.
const NEUTRAL_WHITE_MIREDS: u16 = 286;

/// Hue/saturation of blackbody whites, sampled in mireds from 6500 K down to
/// 2000 K.
const PLANCKIAN_LOCUS_HS: [(u16, (f64, f64)); 15] = [
    (153, (54.95, 1.59)),
    (175, (28.75, 10.32)),
    (200, (27.0, 19.24)),
    (225, (26.72, 27.37)),
    (250, (26.81, 34.87)),
    (275, (27.05, 41.89)),
    (300, (27.36, 48.52)),
    (325, (27.7, 54.85)),
    (350, (28.08, 60.92)),
    (375, (28.47, 66.8)),
    (400, (28.87, 72.52)),
    (425, (29.29, 78.13)),
    (450, (29.72, 83.65)),
    (475, (30.15, 89.11)),
    (500, (30.6, 94.55)),
];

pub fn kelvin_to_mireds(kelvin: u32) -> u16 {
    (1_000_000 / kelvin.max(1)).min(u16::MAX as u32) as u16
}

pub fn mireds_to_kelvin(mireds: u16) -> u32 {
    1_000_000 / u32::from(mireds.max(1))
}

/// Clamp into a light's supported mireds range; unknown bounds do not clamp.
pub fn clamp_mireds(mireds: u16, min: Option<u16>, max: Option<u16>) -> u16 {
    let mut result = mireds;
    if let Some(min) = min {
        result = result.max(min);
    }
    if let Some(max) = max {
        result = result.min(max);
    }
    result
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Absolute distance between two hues along the shorter arc.
pub fn hue_distance(a: f64, b: f64) -> f64 {
    let diff = (a - b).abs() % 360.0;
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}

/// Signed hue delta from `start` to `end` along the shorter arc.
pub fn hue_delta(start: f64, end: f64) -> f64 {
    let mut diff = end - start;
    if diff > 180.0 {
        diff -= 360.0;
    } else if diff < -180.0 {
        diff += 360.0;
    }
    diff
}

/// Interpolate between two colors, hue along the shortest arc.
pub fn interpolate_hs(start: Hs, end: Hs, t: f64) -> Hs {
    let hue = (start.hue + hue_delta(start.hue, end.hue) * t).rem_euclid(360.0);
    let saturation = start.saturation + (end.saturation - start.saturation) * t;
    Hs::new(round2(hue), round2(saturation))
}

pub fn interpolate_mireds(start: u16, end: u16, t: f64) -> u16 {
    let value = f64::from(start) + (f64::from(end) - f64::from(start)) * t;
    value.round().clamp(0.0, f64::from(u16::MAX)) as u16
}

fn hsv_to_hs(hsv: Hsv) -> Hs {
    Hs::new(
        round3(f64::from(hsv.hue.into_positive_degrees()) % 360.0),
        round3(f64::from(hsv.saturation) * 100.0),
    )
}

pub fn rgb_to_hs(r: u8, g: u8, b: u8) -> Hs {
    let rgb = Srgb::new(r, g, b).into_format::<f32>();
    hsv_to_hs(Hsv::from_color(rgb))
}

/// Scale `output` so that its largest channel matches the largest `input`
/// channel.
fn match_max_scale(input: &[f64], output: [f64; 3]) -> (u8, u8, u8) {
    let max_in = input.iter().copied().fold(0.0, f64::max);
    let max_out = output.iter().copied().fold(0.0, f64::max);
    let factor = if max_out == 0.0 { 0.0 } else { max_in / max_out };
    let scale = |c: f64| (c * factor).round().clamp(0.0, 255.0) as u8;
    (scale(output[0]), scale(output[1]), scale(output[2]))
}

pub fn rgbw_to_rgb(r: u8, g: u8, b: u8, w: u8) -> (u8, u8, u8) {
    let (r, g, b, w) = (f64::from(r), f64::from(g), f64::from(b), f64::from(w));
    match_max_scale(&[r, g, b, w], [r + w, g + w, b + w])
}

/// Fold cold/warm white channels back into RGB, assuming a 2700-6500 K
/// white pair.
pub fn rgbww_to_rgb(r: u8, g: u8, b: u8, cw: u8, ww: u8) -> (u8, u8, u8) {
    let min_mireds = f64::from(kelvin_to_mireds(6500));
    let max_mireds = f64::from(kelvin_to_mireds(2700));
    let (cw_f, ww_f) = (f64::from(cw), f64::from(ww));
    let ratio = if cw_f + ww_f == 0.0 {
        0.5
    } else {
        ww_f / (cw_f + ww_f)
    };
    let mireds = min_mireds + ratio * (max_mireds - min_mireds);
    let kelvin = (1_000_000.0 / mireds) as u32;
    let (wr, wg, wb) = kelvin_to_rgb(kelvin);
    let level = cw_f.max(ww_f) / 255.0;
    let (r, g, b) = (f64::from(r), f64::from(g), f64::from(b));
    match_max_scale(
        &[r, g, b, cw_f, ww_f],
        [r + wr * level, g + wg * level, b + wb * level],
    )
}

pub fn rgbw_to_hs(r: u8, g: u8, b: u8, w: u8) -> Hs {
    let (r, g, b) = rgbw_to_rgb(r, g, b, w);
    rgb_to_hs(r, g, b)
}

pub fn rgbww_to_hs(r: u8, g: u8, b: u8, cw: u8, ww: u8) -> Hs {
    let (r, g, b) = rgbww_to_rgb(r, g, b, cw, ww);
    rgb_to_hs(r, g, b)
}

/// Convert CIE 1931 xy chromaticity to HS at full brightness.
pub fn xy_to_hs(x: f64, y: f64) -> Hs {
    let yxy = Yxy::<D65, f32>::new(x as f32, y as f32, 1.0);
    let xyz = Xyz::<D65, f32>::from_color_unclamped(yxy);
    let lin = LinSrgb::<f32>::from_color_unclamped(xyz);

    let max = lin.red.max(lin.green).max(lin.blue);
    let lin = if max > 1.0 {
        LinSrgb::new(lin.red / max, lin.green / max, lin.blue / max)
    } else {
        lin
    };
    let lin = LinSrgb::new(lin.red.max(0.0), lin.green.max(0.0), lin.blue.max(0.0));
    hsv_to_hs(Hsv::from_color(Srgb::<f32>::from_linear(lin)))
}

/// Approximate the RGB color of a blackbody at `kelvin`.
pub fn kelvin_to_rgb(kelvin: u32) -> (f64, f64, f64) {
    let tmp = f64::from(kelvin.clamp(1000, 40000)) / 100.0;
    let clamp = |v: f64| v.clamp(0.0, 255.0);

    let red = if tmp <= 66.0 {
        255.0
    } else {
        clamp(329.698727446 * (tmp - 60.0).powf(-0.1332047592))
    };
    let green = if tmp <= 66.0 {
        clamp(99.4708025861 * tmp.ln() - 161.1195681661)
    } else {
        clamp(288.1221695283 * (tmp - 60.0).powf(-0.0755148492))
    };
    let blue = if tmp >= 66.0 {
        255.0
    } else if tmp <= 19.0 {
        0.0
    } else {
        clamp(138.5177312231 * (tmp - 10.0).ln() - 305.0447927307)
    };

    (red, green, blue)
}

pub fn is_on_planckian_locus(hs: Hs) -> bool {
    hs.saturation <= PLANCKIAN_LOCUS_SATURATION_THRESHOLD
}

/// Color temperature on the locus closest to `hs`.
///
/// Distance is measured on the hue wheel (saturation as radius), so both hue
/// and saturation pull towards the matching temperature.
pub fn hs_to_mireds(hs: Hs) -> u16 {
    if hs.saturation < 3.0 {
        return NEUTRAL_WHITE_MIREDS;
    }

    let point = |h: f64, s: f64| {
        let rad = h.to_radians();
        (s * rad.cos(), s * rad.sin())
    };
    let (x, y) = point(hs.hue, hs.saturation);

    let mut best = NEUTRAL_WHITE_MIREDS;
    let mut best_distance = f64::INFINITY;
    for (mireds, (hue, sat)) in PLANCKIAN_LOCUS_HS {
        let (lx, ly) = point(hue, sat);
        let distance = (x - lx).hypot(y - ly);
        if distance < best_distance {
            best_distance = distance;
            best = mireds;
        }
    }
    best
}

/// HS of the locus point at `mireds`, interpolated between table entries and
/// clamped at both ends.
pub fn mireds_to_hs(mireds: u16) -> Hs {
    let (first_mireds, (h, s)) = PLANCKIAN_LOCUS_HS[0];
    if mireds <= first_mireds {
        return Hs::new(h, s);
    }
    let (last_mireds, (h, s)) = PLANCKIAN_LOCUS_HS[PLANCKIAN_LOCUS_HS.len() - 1];
    if mireds >= last_mireds {
        return Hs::new(h, s);
    }

    for pair in PLANCKIAN_LOCUS_HS.windows(2) {
        let (lo_mireds, (lo_h, lo_s)) = pair[0];
        let (hi_mireds, (hi_h, hi_s)) = pair[1];
        if (lo_mireds..=hi_mireds).contains(&mireds) {
            let t = f64::from(mireds - lo_mireds) / f64::from(hi_mireds - lo_mireds);
            return Hs::new(
                round2(lo_h + (hi_h - lo_h) * t),
                round2(lo_s + (hi_s - lo_s) * t),
            );
        }
    }

    Hs::new(h, s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64, tolerance: f64) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "{actual} not within {tolerance} of {expected}"
        );
    }

    #[test]
    fn test_kelvin_mireds_conversion() {
        assert_eq!(kelvin_to_mireds(2000), 500);
        assert_eq!(kelvin_to_mireds(6500), 153);
        assert_eq!(mireds_to_kelvin(250), 4000);
        assert_eq!(mireds_to_kelvin(0), 1_000_000);
    }

    #[test]
    fn test_clamp_mireds() {
        assert_eq!(clamp_mireds(100, Some(153), Some(500)), 153);
        assert_eq!(clamp_mireds(600, Some(153), Some(500)), 500);
        assert_eq!(clamp_mireds(600, None, None), 600);
        assert_eq!(clamp_mireds(100, None, Some(500)), 100);
    }

    #[test]
    fn test_hue_distance_wraps() {
        assert_eq!(hue_distance(350.0, 10.0), 20.0);
        assert_eq!(hue_distance(10.0, 350.0), 20.0);
        assert_eq!(hue_distance(0.0, 180.0), 180.0);
    }

    #[test]
    fn test_interpolate_hs_takes_short_arc() {
        let mid = interpolate_hs(Hs::new(350.0, 100.0), Hs::new(10.0, 50.0), 0.5);
        assert_eq!(mid, Hs::new(0.0, 75.0));

        let quarter = interpolate_hs(Hs::new(10.0, 0.0), Hs::new(350.0, 0.0), 0.25);
        assert_eq!(quarter, Hs::new(5.0, 0.0));
    }

    #[test]
    fn test_rgb_to_hs() {
        let red = rgb_to_hs(255, 0, 0);
        assert_close(red.hue, 0.0, 0.01);
        assert_close(red.saturation, 100.0, 0.01);

        let blue = rgb_to_hs(0, 0, 255);
        assert_close(blue.hue, 240.0, 0.01);

        let grey = rgb_to_hs(128, 128, 128);
        assert_close(grey.saturation, 0.0, 0.01);
    }

    #[test]
    fn test_rgbw_white_desaturates() {
        let hs = rgbw_to_hs(255, 0, 0, 255);
        assert_close(hs.hue, 0.0, 0.01);
        assert!(hs.saturation < 100.0);
    }

    #[test]
    fn test_rgbww_keeps_dominant_hue() {
        let hs = rgbww_to_hs(0, 0, 255, 0, 0);
        assert_close(hs.hue, 240.0, 0.5);
    }

    #[test]
    fn test_xy_to_hs_white_point_is_unsaturated() {
        let hs = xy_to_hs(0.3127, 0.3290);
        assert!(hs.saturation < 2.0, "saturation {}", hs.saturation);
    }

    #[test]
    fn test_xy_to_hs_red_primary() {
        let hs = xy_to_hs(0.64, 0.33);
        assert!(hue_distance(hs.hue, 0.0) < 2.0, "hue {}", hs.hue);
        assert!(hs.saturation > 95.0);
    }

    #[test]
    fn test_kelvin_to_rgb_warm_and_cool() {
        let (r, _, b) = kelvin_to_rgb(2000);
        assert_eq!(r, 255.0);
        assert!(b < 50.0);

        let (_, _, b) = kelvin_to_rgb(6600);
        assert_eq!(b, 255.0);
    }

    #[test]
    fn test_mireds_to_hs_interpolates_and_clamps() {
        assert_eq!(mireds_to_hs(100), Hs::new(54.95, 1.59));
        assert_eq!(mireds_to_hs(600), Hs::new(30.6, 94.55));
        assert_eq!(mireds_to_hs(250), Hs::new(26.81, 34.87));

        let between = mireds_to_hs(260);
        assert_close(between.hue, 26.91, 0.01);
        assert_close(between.saturation, 37.68, 0.01);
    }

    #[test]
    fn test_hs_to_mireds() {
        assert_eq!(hs_to_mireds(Hs::new(120.0, 1.0)), NEUTRAL_WHITE_MIREDS);
        assert_eq!(hs_to_mireds(Hs::new(27.0, 19.0)), 200);
        assert_eq!(hs_to_mireds(Hs::new(30.5, 94.0)), 500);
    }

    #[test]
    fn test_locus_round_trip_is_stable() {
        for mireds in [200, 300, 400, 500] {
            assert_eq!(hs_to_mireds(mireds_to_hs(mireds)), mireds);
        }
    }

    #[test]
    fn test_is_on_planckian_locus() {
        assert!(is_on_planckian_locus(Hs::new(200.0, 15.0)));
        assert!(!is_on_planckian_locus(Hs::new(30.0, 15.1)));
    }
}
