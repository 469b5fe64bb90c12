//! Joypad button identifiers
//!
//! Button ids follow the libretro joypad numbering. Names are accepted either
//! in full (`RETRO_DEVICE_ID_JOYPAD_START`) or short (`START`), case-insensitive.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Prefix of the full button names
pub const JOYPAD_PREFIX: &str = "RETRO_DEVICE_ID_JOYPAD_";

/// Number of joypad buttons
pub const BUTTON_COUNT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoypadButton {
    B,
    Y,
    Select,
    Start,
    Up,
    Down,
    Left,
    Right,
    A,
    X,
    L,
    R,
    L2,
    R2,
    L3,
    R3,
}

impl JoypadButton {
    /// All buttons in id order
    pub const ALL: [Self; BUTTON_COUNT] = [
        Self::B,
        Self::Y,
        Self::Select,
        Self::Start,
        Self::Up,
        Self::Down,
        Self::Left,
        Self::Right,
        Self::A,
        Self::X,
        Self::L,
        Self::R,
        Self::L2,
        Self::R2,
        Self::L3,
        Self::R3,
    ];

    /// libretro joypad id
    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    /// Short upper-case name, e.g. `START`
    pub fn short_name(self) -> &'static str {
        match self {
            Self::B => "B",
            Self::Y => "Y",
            Self::Select => "SELECT",
            Self::Start => "START",
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
            Self::A => "A",
            Self::X => "X",
            Self::L => "L",
            Self::R => "R",
            Self::L2 => "L2",
            Self::R2 => "R2",
            Self::L3 => "L3",
            Self::R3 => "R3",
        }
    }
}

impl fmt::Display for JoypadButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{JOYPAD_PREFIX}{}", self.short_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid key: {0}")]
pub struct UnknownButton(pub String);

impl FromStr for JoypadButton {
    type Err = UnknownButton;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let short = upper.strip_prefix(JOYPAD_PREFIX).unwrap_or(upper.as_str());
        Self::ALL
            .into_iter()
            .find(|b| b.short_name() == short)
            .ok_or_else(|| UnknownButton(s.to_owned()))
    }
}
