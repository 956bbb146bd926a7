//! Messages crossing the platform boundary.
//!
//! - `FromPlatformMessage`: notifications from a device platform to the engine
//! - `LightCommand`: actuation requests from the engine to a platform

use serde::Serialize;

use super::state::LightColor;
use super::state::LightState;

/// Messages FROM device platforms TO the engine
#[derive(Debug, Clone, PartialEq)]
pub enum FromPlatformMessage {
    /// A light was discovered and can now be faded
    LightDiscovered { light_id: String, platform: String },

    /// A light went away (device unplugged, discovery retracted, etc.)
    LightRemoved { light_id: String },

    /// A light's state changed
    LightStateChanged(StateChanged),
}

/// A single state-change notification.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChanged {
    pub light_id: String,
    pub old: LightState,
    pub new: LightState,

    /// Set when the platform can correlate the change to a command the
    /// engine issued itself.
    pub self_originated: bool,
}

/// Command sent to a light.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct LightCommand {
    pub on: bool,
    pub brightness: Option<u8>,
    pub color: Option<LightColor>,

    /// Ask the hardware to transition natively over this many milliseconds.
    pub transition_ms: Option<u32>,
}

impl LightCommand {
    pub fn off() -> Self {
        Self::default()
    }

    /// Build the command that drives a light to `brightness` / `color`.
    ///
    /// Brightness 0 turns the light off; anything else (or no brightness at
    /// all) keeps it on.
    pub fn to(brightness: Option<u8>, color: Option<LightColor>) -> Self {
        match brightness {
            Some(0) => Self::off(),
            _ => Self {
                on: true,
                brightness,
                color,
                transition_ms: None,
            },
        }
    }

    pub fn with_transition_ms(mut self, transition_ms: Option<u32>) -> Self {
        self.transition_ms = transition_ms.filter(|ms| *ms > 0);
        self
    }
}

impl std::fmt::Display for LightCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.on {
            return f.write_str("off");
        }
        f.write_str("on")?;
        if let Some(brightness) = self.brightness {
            write!(f, " brightness={brightness}")?;
        }
        match self.color {
            Some(LightColor::Hs(hs)) => write!(f, " hs_color={hs}")?,
            Some(LightColor::ColorTemp(mireds)) => write!(f, " mireds={mireds}")?,
            None => {}
        }
        if let Some(ms) = self.transition_ms {
            write!(f, " transition={ms}ms")?;
        }
        Ok(())
    }
}
