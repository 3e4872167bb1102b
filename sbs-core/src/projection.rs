//! Local tangent-plane projection — equirectangular lat/lon ⇄ (x, y) meters.
//!
//! Each track is projected about its own reference point (the first fix).
//! Accuracy is fine for tens to low hundreds of km from the reference; the
//! distortion beyond that is not corrected.
//!
//! Key constants:
//! - 111320 m per degree of longitude at the equator (scaled by cos(ref_lat))
//! - 110574 m per degree of latitude (constant)

/// Meters per degree of longitude at the equator.
const M_PER_DEG_LON_EQUATOR: f64 = 111_320.0;

/// Meters per degree of latitude.
const M_PER_DEG_LAT: f64 = 110_574.0;

/// Equirectangular projection anchored at a fixed reference point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalProjection {
    pub ref_lat: f64,
    pub ref_lon: f64,
    m_per_deg_lon: f64,
}

impl LocalProjection {
    pub fn new(ref_lat: f64, ref_lon: f64) -> Self {
        LocalProjection {
            ref_lat,
            ref_lon,
            m_per_deg_lon: M_PER_DEG_LON_EQUATOR * ref_lat.to_radians().cos(),
        }
    }

    /// Geodetic degrees to local meters `(x east, y north)`.
    pub fn to_local(&self, lat: f64, lon: f64) -> (f64, f64) {
        let x = (lon - self.ref_lon) * self.m_per_deg_lon;
        let y = (lat - self.ref_lat) * M_PER_DEG_LAT;
        (x, y)
    }

    /// Local meters back to geodetic degrees `(lat, lon)`.
    pub fn to_geodetic(&self, x: f64, y: f64) -> (f64, f64) {
        let lat = y / M_PER_DEG_LAT + self.ref_lat;
        let lon = x / self.m_per_deg_lon + self.ref_lon;
        (lat, lon)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
