// SPDX-License-Identifier: GPL-3.0-only
//! Display data model shared by every engine component

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Stable name of an output across enable/disable cycles
pub type DisplayId = String;

/// Default color depth reported for modes that do not carry one
pub const DEFAULT_BITS_PER_PIXEL: u32 = 32;

/// A concrete (resolution, refresh rate, bit depth) combination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    pub refresh_rate_hz: u32,
    pub bits_per_pixel: u32,
}

impl DisplayMode {
    pub fn new(width: u32, height: u32, refresh_rate_hz: u32) -> Self {
        Self {
            width,
            height,
            refresh_rate_hz,
            bits_per_pixel: DEFAULT_BITS_PER_PIXEL,
        }
    }

    pub fn with_depth(mut self, bits_per_pixel: u32) -> Self {
        self.bits_per_pixel = bits_per_pixel;
        self
    }

    /// Zero width, height or refresh marks a bogus enumerated entry
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.refresh_rate_hz > 0
    }

    /// Compares width, height and refresh, ignoring depth
    pub fn same_timing(&self, other: &DisplayMode) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.refresh_rate_hz == other.refresh_rate_hz
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}Hz", self.width, self.height, self.refresh_rate_hz)
    }
}

impl FromStr for DisplayMode {
    type Err = String;

    /// Parses `WIDTHxHEIGHT@HZ`, e.g. `2560x1440@144`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().trim_end_matches("Hz").trim_end_matches("hz");
        let (size, refresh) = s
            .split_once('@')
            .ok_or_else(|| format!("expected WIDTHxHEIGHT@HZ, got '{s}'"))?;
        let (width, height) = size
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{size}'"))?;

        let parse = |v: &str, what: &str| {
            v.trim()
                .parse::<u32>()
                .map_err(|e| format!("invalid {what} '{v}': {e}"))
        };

        let mode = DisplayMode::new(
            parse(width, "width")?,
            parse(height, "height")?,
            parse(refresh, "refresh rate")?,
        );
        if !mode.is_valid() {
            return Err(format!("mode {mode} has a zero component"));
        }
        Ok(mode)
    }
}

/// Desktop coordinates of an output's top-left corner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Chebyshev distance, used for "within rounding tolerance" checks
    pub fn distance(&self, other: &Position) -> u32 {
        self.x.abs_diff(other.x).max(self.y.abs_diff(other.y))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Orientation {
    #[default]
    Landscape,
    Portrait,
    LandscapeFlipped,
    PortraitFlipped,
}

impl Orientation {
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees % 360 {
            0 => Some(Orientation::Landscape),
            90 => Some(Orientation::Portrait),
            180 => Some(Orientation::LandscapeFlipped),
            270 => Some(Orientation::PortraitFlipped),
            _ => None,
        }
    }

    /// Portrait orientations swap the on-desktop width and height
    pub fn swaps_axes(&self) -> bool {
        matches!(self, Orientation::Portrait | Orientation::PortraitFlipped)
    }

    /// On-desktop extent of a mode shown in this orientation
    pub fn extent(&self, mode: &DisplayMode) -> (u32, u32) {
        if self.swaps_axes() {
            (mode.height, mode.width)
        } else {
            (mode.width, mode.height)
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Orientation::Landscape => "landscape",
            Orientation::Portrait => "portrait",
            Orientation::LandscapeFlipped => "landscape-flipped",
            Orientation::PortraitFlipped => "portrait-flipped",
        };
        f.pad(name)
    }
}

impl FromStr for Orientation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "landscape" | "normal" => Ok(Orientation::Landscape),
            "portrait" | "left" => Ok(Orientation::Portrait),
            "landscape-flipped" | "inverted" => Ok(Orientation::LandscapeFlipped),
            "portrait-flipped" | "right" => Ok(Orientation::PortraitFlipped),
            other => other
                .parse::<u32>()
                .ok()
                .and_then(Orientation::from_degrees)
                .ok_or_else(|| format!("unknown orientation '{other}'")),
        }
    }
}

/// One resolution and every refresh rate it is offered at (ascending)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionGroup {
    pub width: u32,
    pub height: u32,
    pub refresh_rates: Vec<u32>,
}

/// What an active output can be driven at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayCapabilities {
    pub current_mode: DisplayMode,
    pub available_modes: Vec<DisplayMode>,
    pub resolutions: Vec<ResolutionGroup>,
}

/// Snapshot of one output, rebuilt from scratch on every enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayInfo {
    pub id: DisplayId,
    pub name: String,
    pub current_mode: Option<DisplayMode>,
    pub position: Position,
    pub orientation: Orientation,
    pub is_primary: bool,
    pub is_enabled: bool,
    pub capabilities: Option<DisplayCapabilities>,
}

impl DisplayInfo {
    /// On-desktop width and height, if the output is driven
    pub fn extent(&self) -> Option<(u32, u32)> {
        self.current_mode.map(|mode| self.orientation.extent(&mode))
    }

    /// Right edge on the desktop, used to place outputs side by side
    pub fn right_edge(&self) -> i32 {
        let width = self.extent().map(|(w, _)| w).unwrap_or(0);
        self.position.x.saturating_add(width as i32)
    }
}
