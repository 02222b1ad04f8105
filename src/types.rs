// Shared types module - Color records, channels and device mode
use serde::{Deserialize, Serialize};
use std::fmt;

// Panel exit reason - used to tell the caller why the panel loop ended
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PanelExitReason {
    UserQuit,      // User pressed 'q' or Ctrl+C
    InputClosed,   // Terminal event stream failed
}

// RGB color record of one LED
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };

    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Rgb { r, g, b }
    }

    pub fn channel(&self, channel: Channel) -> u8 {
        match channel {
            Channel::Red => self.r,
            Channel::Green => self.g,
            Channel::Blue => self.b,
        }
    }

    pub fn set_channel(&mut self, channel: Channel, value: u8) {
        match channel {
            Channel::Red => self.r = value,
            Channel::Green => self.g = value,
            Channel::Blue => self.b = value,
        }
    }
}

// Color channel addressed by a slider
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    Red,
    Green,
    Blue,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Red, Channel::Green, Channel::Blue];

    pub fn letter(&self) -> char {
        match self {
            Channel::Red => 'r',
            Channel::Green => 'g',
            Channel::Blue => 'b',
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Device operating mode as reported by `/status`.
///
/// `"color"` means per-channel manual control is authoritative; any other
/// string means an automatic effect is driving the lamp.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Mode {
    #[default]
    Color,
    Effect(String),
}

impl Mode {
    pub fn is_color(&self) -> bool {
        matches!(self, Mode::Color)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Mode::Color => "color",
            Mode::Effect(name) => name,
        }
    }
}

impl From<String> for Mode {
    fn from(s: String) -> Self {
        if s == "color" {
            Mode::Color
        } else {
            Mode::Effect(s)
        }
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> Self {
        mode.as_str().to_string()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `GET /status`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LampStatus {
    pub mode: Mode,
    pub leds: Vec<Rgb>,
}
