//! Shared types, error enum, and the validated measurement type for sbs-core.

use serde::Serialize;
use thiserror::Error;

/// All errors produced by sbs-core.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload has no 'aircraft' array")]
    MissingAircraft,
    #[error("invalid aircraft entry: {0}")]
    InvalidEntry(String),
    #[error("innovation covariance is singular for {0}")]
    SingularInnovation(String),
    #[error("track {0} has a non-finite state")]
    DivergedTrack(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;

// ---------------------------------------------------------------------------
// Aircraft identity
// ---------------------------------------------------------------------------

/// Normalize an aircraft address: trimmed, uppercase, non-empty.
///
/// The address is used verbatim as the track key, so every producer of keys
/// must go through this function.
pub fn normalize_icao(raw: &str) -> Option<String> {
    let icao = raw.trim();
    if icao.is_empty() {
        return None;
    }
    Some(icao.to_ascii_uppercase())
}

// ---------------------------------------------------------------------------
// Measurement
// ---------------------------------------------------------------------------

/// One validated position report, already converted to SI units.
///
/// Built from an inbound aircraft entry that carried identity, latitude,
/// longitude, and altitude. Optional kinematics default to zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub icao: String,
    pub lat: f64,
    pub lon: f64,
    pub altitude_m: f64,
    pub speed_mps: f64,
    pub heading_deg: f64,
    pub vertical_rate_mps: f64,
    pub callsign: String,
    pub squawk: String,
    /// Wall-clock receive time, seconds since the Unix epoch.
    pub timestamp: f64,
}

impl Measurement {
    /// Planar velocity (east, north) from ground speed and heading.
    ///
    /// Heading is clockwise from true north.
    pub fn planar_velocity(&self) -> (f64, f64) {
        let heading = self.heading_deg.to_radians();
        (
            self.speed_mps * heading.sin(),
            self.speed_mps * heading.cos(),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
