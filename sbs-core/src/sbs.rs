//! SBS (BaseStation) line encoding.
//!
//! Every line is `MSG,3` (airborne position) with 22 comma-separated fields:
//!
//! ```text
//!  1 MSG          2 3            3 session     4 aircraft id   5 hex ident
//!  6 flight id    7 date gen     8 time gen    9 date logged  10 time logged
//! 11 callsign    12 altitude ft 13 ground kt  14 track deg    15 lat
//! 16 lon         17 vrate fpm   18 squawk     19 alert        20 emergency
//! 21 spi         22 on ground
//! ```
//!
//! A field whose value cannot be produced (non-finite input, missing source)
//! is left empty; the rest of the line is still emitted.

use chrono::{DateTime, NaiveDateTime};

use crate::kalman::TrackSnapshot;
use crate::report::AircraftReport;

/// Meters to feet.
pub const M_TO_FT: f64 = 3.28084;

/// Millimeters to feet, applied to raw `altitudeMM`.
const MM_TO_FT: f64 = 0.003_280_84;

/// Meters per second to knots.
pub const MPS_TO_KTS: f64 = 1.94384;

/// Meters per second to feet per minute.
pub const MPS_TO_FPM: f64 = 196.850394;

/// Number of fields in one SBS line.
pub const FIELD_COUNT: usize = 22;

const DATE_FORMAT: &str = "%Y/%m/%d";
const TIME_FORMAT: &str = "%H:%M:%S";

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

/// Round half-to-even and print as an integer. Empty if not finite.
fn int_field(value: f64) -> String {
    if !value.is_finite() {
        return String::new();
    }
    format!("{}", value.round_ties_even() as i64)
}

/// Fixed 5-decimal coordinate. Empty if not finite.
fn coord_field(value: f64) -> String {
    if !value.is_finite() {
        return String::new();
    }
    format!("{value:.5}")
}

/// Track angle clockwise from north, rounded into `0..360`.
fn track_field(vx: f64, vy: f64) -> String {
    if !vx.is_finite() || !vy.is_finite() {
        return String::new();
    }
    let mut deg = vx.atan2(vy).to_degrees();
    if deg < 0.0 {
        deg += 360.0;
    }
    let rounded = deg.round_ties_even() as i64;
    format!("{}", rounded.rem_euclid(360))
}

/// Free text with line and field delimiters removed, then trimmed.
fn text_field(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, ',' | '\r' | '\n'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Join the variable fields into a full `MSG,3` line with trailing newline.
#[allow(clippy::too_many_arguments)]
fn assemble(
    icao: &str,
    date: &str,
    time: &str,
    callsign: &str,
    altitude: String,
    speed: String,
    track: String,
    lat: String,
    lon: String,
    vrate: String,
    squawk: &str,
) -> String {
    let icao = text_field(icao).to_ascii_uppercase();
    let callsign = text_field(callsign);
    let squawk = text_field(squawk);
    let fields: [&str; FIELD_COUNT] = [
        "MSG",
        "3",
        "",
        "",
        &icao,
        "",
        date,
        time,
        date,
        time,
        &callsign,
        &altitude,
        &speed,
        &track,
        &lat,
        &lon,
        &vrate,
        &squawk,
        "0",
        "0",
        "0",
        "0",
    ];
    let mut line = fields.join(",");
    line.push('\n');
    line
}

// ---------------------------------------------------------------------------
// Encoders
// ---------------------------------------------------------------------------

/// Encode a predicted track as one SBS line generated at `generated`
/// (local wall-clock time).
pub fn encode_track(snap: &TrackSnapshot, generated: NaiveDateTime) -> String {
    let date = generated.format(DATE_FORMAT).to_string();
    let time = generated.format(TIME_FORMAT).to_string();
    let (lat, lon) = snap.lat_lon();

    assemble(
        &snap.icao,
        &date,
        &time,
        &snap.callsign,
        int_field(snap.altitude_m * M_TO_FT),
        int_field(snap.vx.hypot(snap.vy) * MPS_TO_KTS),
        track_field(snap.vx, snap.vy),
        coord_field(lat),
        coord_field(lon),
        int_field(snap.v_alt * MPS_TO_FPM),
        &snap.squawk,
    )
}

/// Encode a raw report without filtering.
///
/// Date/time come from the report's own `timeStamp`; heading is passed
/// through as the track angle.
pub fn encode_report(report: &AircraftReport) -> String {
    let (date, time) = report
        .time_stamp
        .as_deref()
        .and_then(split_timestamp)
        .unwrap_or_default();

    let opt_int = |v: Option<f64>, convert: fn(f64) -> f64| {
        v.map(|v| int_field(convert(v))).unwrap_or_default()
    };
    let opt_coord = |v: Option<f64>| {
        v.filter(|v| v.is_finite())
            .map(|v| format!("{v:?}"))
            .unwrap_or_default()
    };

    assemble(
        report.icao_address.as_deref().unwrap_or(""),
        &date,
        &time,
        report.callsign.as_deref().unwrap_or(""),
        opt_int(report.altitude_mm, |mm| mm * MM_TO_FT),
        opt_int(report.hor_velocity_cms, |cms| cms / 100.0 * MPS_TO_KTS),
        opt_int(report.heading_de2, |de2| de2 / 100.0),
        opt_coord(report.lat_dd),
        opt_coord(report.lon_dd),
        opt_int(report.ver_velocity_cms, |cms| cms / 100.0 * MPS_TO_FPM),
        report.squawk.as_deref().unwrap_or(""),
    )
}

/// Split an ISO-8601 timestamp into SBS `(YYYY/MM/DD, HH:MM:SS)`.
///
/// Accepts RFC 3339 (`2024-05-01T12:00:00Z`, offsets, fractions) and naive
/// `2024-05-01T12:00:00[.fff]`. The wall-clock part is kept as written.
pub fn split_timestamp(ts: &str) -> Option<(String, String)> {
    let naive = match DateTime::parse_from_rfc3339(ts) {
        Ok(dt) => dt.naive_local(),
        Err(_) => NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f").ok()?,
    };
    Some((
        naive.format(DATE_FORMAT).to_string(),
        naive.format(TIME_FORMAT).to_string(),
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
