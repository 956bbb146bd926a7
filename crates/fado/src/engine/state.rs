use serde::Deserialize;
use serde::Serialize;
use strum::EnumString;

use crate::color::Hs;

/// Color a light is currently showing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightColor {
    Hs(Hs),
    /// Color temperature in mireds.
    ColorTemp(u16),
}

/// State of a light.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LightState {
    /// Whether the light is on or off.
    pub on: bool,

    /// Brightness level (0-255), if supported.
    pub brightness: Option<u8>,

    /// Current color, if the light reports one.
    pub color: Option<LightColor>,
}

impl LightState {
    /// Brightness as seen by the fade engine: an off light is at 0.
    pub fn observed_brightness(&self) -> Option<u8> {
        if self.on {
            self.brightness
        } else {
            Some(0)
        }
    }

    pub fn hs(&self) -> Option<Hs> {
        match self.color {
            Some(LightColor::Hs(hs)) => Some(hs),
            _ => None,
        }
    }

    pub fn mireds(&self) -> Option<u16> {
        match self.color {
            Some(LightColor::ColorTemp(mireds)) => Some(mireds),
            _ => None,
        }
    }
}

/// Color modes a light can be driven in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ColorMode {
    #[serde(rename = "onoff")]
    #[strum(serialize = "onoff")]
    OnOff,
    Brightness,
    Hs,
    Rgb,
    Rgbw,
    Rgbww,
    Xy,
    ColorTemp,
}

impl ColorMode {
    fn is_dimmable(self) -> bool {
        !matches!(self, ColorMode::OnOff)
    }

    fn is_hs(self) -> bool {
        matches!(
            self,
            ColorMode::Hs | ColorMode::Rgb | ColorMode::Rgbw | ColorMode::Rgbww | ColorMode::Xy
        )
    }
}

/// What a light can do.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub color_modes: Vec<ColorMode>,

    /// Coolest supported color temperature.
    #[serde(default)]
    pub min_mireds: Option<u16>,

    /// Warmest supported color temperature.
    #[serde(default)]
    pub max_mireds: Option<u16>,
}

impl Capabilities {
    pub fn new(color_modes: impl IntoIterator<Item = ColorMode>) -> Self {
        Self {
            color_modes: color_modes.into_iter().collect(),
            min_mireds: None,
            max_mireds: None,
        }
    }

    pub fn with_mireds_range(mut self, min: u16, max: u16) -> Self {
        self.min_mireds = Some(min);
        self.max_mireds = Some(max);
        self
    }

    pub fn supports_brightness(&self) -> bool {
        self.color_modes.iter().any(|m| m.is_dimmable())
    }

    pub fn supports_hs(&self) -> bool {
        self.color_modes.iter().any(|m| m.is_hs())
    }

    pub fn supports_color_temp(&self) -> bool {
        self.color_modes.contains(&ColorMode::ColorTemp)
    }
}

/// Everything the engine reads about a light before planning.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LightSnapshot {
    pub state: LightState,
    pub capabilities: Capabilities,
}
