//! Inbound report decoding — one JSON object per UDP datagram.
//!
//! Payload shape:
//!
//! ```text
//! {"aircraft": [
//!   {"icaoAddress": "ABC123", "latDD": 52.0, "lonDD": 4.0,
//!    "altitudeMM": 10000000, "horVelocityCMS": 20000, "headingDE2": 9000,
//!    "verVelocityCMS": 0, "callsign": "KLM123", "squawk": "1000",
//!    "timeStamp": "2024-05-01T12:00:00Z"},
//!   ...
//! ]}
//! ```
//!
//! Entries are decoded one by one so a single bad entry never costs the rest
//! of the batch.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::types::{normalize_icao, Measurement, RelayError, Result};

/// Largest payload a single datagram can carry.
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// One aircraft entry exactly as received. Units are the wire units.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AircraftReport {
    #[serde(rename = "icaoAddress")]
    pub icao_address: Option<String>,
    /// Degrees.
    #[serde(rename = "latDD")]
    pub lat_dd: Option<f64>,
    /// Degrees.
    #[serde(rename = "lonDD")]
    pub lon_dd: Option<f64>,
    /// Millimeters.
    #[serde(rename = "altitudeMM")]
    pub altitude_mm: Option<f64>,
    /// Centimeters per second.
    #[serde(rename = "horVelocityCMS")]
    pub hor_velocity_cms: Option<f64>,
    /// Centidegrees, 0-35999.
    #[serde(rename = "headingDE2")]
    pub heading_de2: Option<f64>,
    /// Centimeters per second.
    #[serde(rename = "verVelocityCMS")]
    pub ver_velocity_cms: Option<f64>,
    pub callsign: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub squawk: Option<String>,
    #[serde(rename = "timeStamp")]
    pub time_stamp: Option<String>,
}

/// Squawk codes show up both as strings and as bare numbers.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

impl AircraftReport {
    /// Validate required fields and convert to SI units.
    ///
    /// Requires a non-empty address plus latitude, longitude, and altitude.
    pub fn to_measurement(&self, received_at: f64) -> Result<Measurement> {
        let icao = self
            .icao_address
            .as_deref()
            .and_then(normalize_icao)
            .ok_or_else(|| RelayError::InvalidEntry("missing icaoAddress".into()))?;
        let lat = self
            .lat_dd
            .ok_or_else(|| RelayError::InvalidEntry(format!("{icao}: missing latDD")))?;
        let lon = self
            .lon_dd
            .ok_or_else(|| RelayError::InvalidEntry(format!("{icao}: missing lonDD")))?;
        let altitude_mm = self
            .altitude_mm
            .ok_or_else(|| RelayError::InvalidEntry(format!("{icao}: missing altitudeMM")))?;

        Ok(Measurement {
            icao,
            lat,
            lon,
            altitude_m: altitude_mm / 1000.0,
            speed_mps: self.hor_velocity_cms.unwrap_or(0.0) / 100.0,
            heading_deg: self.heading_de2.unwrap_or(0.0) / 100.0,
            vertical_rate_mps: self.ver_velocity_cms.unwrap_or(0.0) / 100.0,
            callsign: self.callsign.as_deref().unwrap_or("").trim().to_string(),
            squawk: self.squawk.clone().unwrap_or_default(),
            timestamp: received_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Datagram decoding
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct Envelope {
    aircraft: Option<Vec<Value>>,
}

/// Entries decoded from one datagram.
#[derive(Debug, Default)]
pub struct ReportBatch {
    pub reports: Vec<AircraftReport>,
    /// Entries that could not be decoded (wrong field types).
    pub rejected: Vec<RelayError>,
}

/// Decode one datagram payload.
///
/// Fails for malformed JSON and for payloads without an `aircraft` array.
/// Individually malformed entries end up in `rejected`.
pub fn decode_datagram(payload: &[u8]) -> Result<ReportBatch> {
    let envelope: Envelope = serde_json::from_slice(payload)?;
    let entries = envelope.aircraft.ok_or(RelayError::MissingAircraft)?;

    let mut batch = ReportBatch::default();
    for (i, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<AircraftReport>(entry) {
            Ok(report) => batch.reports.push(report),
            Err(e) => batch
                .rejected
                .push(RelayError::InvalidEntry(format!("entry {i}: {e}"))),
        }
    }
    Ok(batch)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
