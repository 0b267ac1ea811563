//! Core data types for live aircraft state distribution.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fallback text for missing callsigns and origin countries.
pub const UNKNOWN: &str = "Unknown";

/// Emitter category, mapped from the upstream integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AircraftCategory {
    #[default]
    Unknown,
    Light,
    Small,
    Large,
    #[serde(rename = "High-Vortex-Large")]
    HighVortexLarge,
    Heavy,
    #[serde(rename = "High-Performance")]
    HighPerformance,
    Rotorcraft,
}

impl AircraftCategory {
    /// Map an upstream category code. Anything outside 0..=7 is `Unknown`.
    pub const fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Light,
            2 => Self::Small,
            3 => Self::Large,
            4 => Self::HighVortexLarge,
            5 => Self::Heavy,
            6 => Self::HighPerformance,
            7 => Self::Rotorcraft,
            _ => Self::Unknown,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Light => "Light",
            Self::Small => "Small",
            Self::Large => "Large",
            Self::HighVortexLarge => "High-Vortex-Large",
            Self::Heavy => "Heavy",
            Self::HighPerformance => "High-Performance",
            Self::Rotorcraft => "Rotorcraft",
        }
    }
}

impl fmt::Display for AircraftCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Geographic position. Altitude is in the feed's units (meters for OpenSky).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// Velocity vector. Always present, zeroed when the feed omits a component.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Velocity {
    /// Ground speed
    pub speed: f64,
    /// True track in degrees
    pub heading: f64,
    pub vertical_rate: f64,
}

/// Canonical aircraft state as produced by one normalization pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightRecord {
    /// ICAO 24-bit address as lowercase hex
    pub icao24: String,
    pub callsign: String,
    pub origin_country: String,
    pub position: Option<Position>,
    pub velocity: Velocity,
    pub on_ground: bool,
    /// Unix seconds of the last contact
    pub last_update: i64,
    pub category: AircraftCategory,
}

impl FlightRecord {
    pub fn altitude(&self) -> f64 {
        self.position.map_or(0.0, |p| p.altitude)
    }

    /// Rough display priority: higher and faster aircraft first.
    pub fn display_priority(&self) -> f64 {
        self.altitude() + self.velocity.speed
    }
}

/// Connection id of a broadcast subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}
