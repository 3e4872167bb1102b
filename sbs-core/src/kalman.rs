//! Per-aircraft constant-velocity Kalman filter in local tangent-plane
//! coordinates.
//!
//! State vector: `[x, y, alt, vx, vy, v_alt]` in meters and meters/second,
//! with x east and y north of the track's reference origin. Measurements are
//! `[x, y, alt]`; velocity is never observed directly, only seeded from the
//! first report and then inferred from successive positions.

use nalgebra::{Matrix3, Matrix6, SMatrix, Vector3, Vector6};
use serde::Serialize;

use crate::projection::LocalProjection;
use crate::types::{Measurement, RelayError, Result};

/// Default diagonal of the initial covariance.
pub const DEFAULT_INITIAL_VARIANCE: f64 = 100.0;

/// Default diagonal of the process noise, added on every prediction.
pub const DEFAULT_PROCESS_NOISE: f64 = 0.1;

/// Default diagonal of the measurement noise for `[x, y, alt]`.
pub const DEFAULT_MEASUREMENT_NOISE: f64 = 10.0;

/// Observation model: picks position and altitude out of the state.
type Observation = SMatrix<f64, 3, 6>;

fn observation() -> Observation {
    Observation::identity()
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Noise tuning shared by every track. Fixed once a track is created.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterParams {
    pub initial_variance: f64,
    pub process_noise: f64,
    pub measurement_noise: f64,
}

impl Default for FilterParams {
    fn default() -> Self {
        FilterParams {
            initial_variance: DEFAULT_INITIAL_VARIANCE,
            process_noise: DEFAULT_PROCESS_NOISE,
            measurement_noise: DEFAULT_MEASUREMENT_NOISE,
        }
    }
}

/// State transition for an elapsed time of `dt` seconds.
pub fn transition(dt: f64) -> Matrix6<f64> {
    let mut f = Matrix6::identity();
    f[(0, 3)] = dt;
    f[(1, 4)] = dt;
    f[(2, 5)] = dt;
    f
}

// ---------------------------------------------------------------------------
// Track filter
// ---------------------------------------------------------------------------

/// Kalman filter plus identity metadata for one aircraft.
#[derive(Debug, Clone)]
pub struct TrackFilter {
    pub icao: String,
    pub callsign: String,
    pub squawk: String,
    origin: LocalProjection,
    state: Vector6<f64>,
    covariance: Matrix6<f64>,
    process_noise: Matrix6<f64>,
    measurement_noise: Matrix3<f64>,
    /// Time the state vector refers to. Advanced by prediction, never rewound.
    state_time: f64,
    /// Time of the last measurement folded in.
    last_update: f64,
}

impl TrackFilter {
    /// Start a track from its first measurement, which also fixes the origin.
    pub fn new(m: &Measurement, params: &FilterParams) -> Self {
        let (vx, vy) = m.planar_velocity();
        TrackFilter {
            icao: m.icao.clone(),
            callsign: m.callsign.trim().to_string(),
            squawk: m.squawk.clone(),
            origin: LocalProjection::new(m.lat, m.lon),
            state: Vector6::new(0.0, 0.0, m.altitude_m, vx, vy, m.vertical_rate_mps),
            covariance: Matrix6::identity() * params.initial_variance,
            process_noise: Matrix6::identity() * params.process_noise,
            measurement_noise: Matrix3::identity() * params.measurement_noise,
            state_time: m.timestamp,
            last_update: m.timestamp,
        }
    }

    pub fn state(&self) -> &Vector6<f64> {
        &self.state
    }

    pub fn covariance(&self) -> &Matrix6<f64> {
        &self.covariance
    }

    pub fn origin(&self) -> &LocalProjection {
        &self.origin
    }

    pub fn last_update(&self) -> f64 {
        self.last_update
    }

    pub fn state_time(&self) -> f64 {
        self.state_time
    }

    /// Advance state and covariance by `dt` seconds. No-op for `dt <= 0`.
    pub fn predict(&mut self, dt: f64) {
        if dt <= 0.0 {
            return;
        }
        let (state, covariance) = self.predicted(dt);
        self.state = state;
        self.covariance = covariance;
        self.state_time += dt;
    }

    /// Predict forward to the absolute time `now`.
    pub fn predict_to(&mut self, now: f64) {
        self.predict(now - self.state_time);
    }

    /// Fold in a position measurement taken at `timestamp`.
    ///
    /// On a singular innovation covariance the filter is left untouched,
    /// including the prediction step. A measurement older than the state
    /// (a tick already predicted past it) is applied at the state time, so
    /// the state clock never runs backwards.
    pub fn update(&mut self, lat: f64, lon: f64, altitude_m: f64, timestamp: f64) -> Result<()> {
        let dt = timestamp - self.state_time;
        let (state, covariance) = if dt > 0.0 {
            self.predicted(dt)
        } else {
            (self.state, self.covariance)
        };

        let h = observation();
        let (zx, zy) = self.origin.to_local(lat, lon);
        let residual = Vector3::new(zx, zy, altitude_m) - h * state;

        let pht = covariance * h.transpose();
        let s = h * pht + self.measurement_noise;
        let s_inv = s
            .try_inverse()
            .filter(|inv| inv.iter().all(|v| v.is_finite()))
            .ok_or_else(|| RelayError::SingularInnovation(self.icao.clone()))?;
        let gain = pht * s_inv;

        self.state = state + gain * residual;
        self.covariance = (Matrix6::identity() - gain * h) * covariance;
        self.state_time = self.state_time.max(timestamp);
        self.last_update = timestamp;
        Ok(())
    }

    /// Overwrite metadata and fold in the measurement.
    pub fn apply(&mut self, m: &Measurement) -> Result<()> {
        self.callsign = m.callsign.trim().to_string();
        self.squawk = m.squawk.clone();
        self.update(m.lat, m.lon, m.altitude_m, m.timestamp)
    }

    /// Copy out what the encoder needs. Fails if the state has diverged.
    pub fn snapshot(&self) -> Result<TrackSnapshot> {
        if self.state.iter().any(|v| !v.is_finite()) {
            return Err(RelayError::DivergedTrack(self.icao.clone()));
        }
        Ok(TrackSnapshot {
            icao: self.icao.clone(),
            callsign: self.callsign.clone(),
            squawk: self.squawk.clone(),
            ref_lat: self.origin.ref_lat,
            ref_lon: self.origin.ref_lon,
            x: self.state[0],
            y: self.state[1],
            altitude_m: self.state[2],
            vx: self.state[3],
            vy: self.state[4],
            v_alt: self.state[5],
            state_time: self.state_time,
            last_update: self.last_update,
        })
    }

    fn predicted(&self, dt: f64) -> (Vector6<f64>, Matrix6<f64>) {
        let f = transition(dt);
        let state = f * self.state;
        let covariance = f * self.covariance * f.transpose() + self.process_noise;
        (state, covariance)
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Immutable copy of one track's kinematic state at `state_time`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackSnapshot {
    pub icao: String,
    pub callsign: String,
    pub squawk: String,
    pub ref_lat: f64,
    pub ref_lon: f64,
    pub x: f64,
    pub y: f64,
    pub altitude_m: f64,
    pub vx: f64,
    pub vy: f64,
    pub v_alt: f64,
    pub state_time: f64,
    pub last_update: f64,
}

impl TrackSnapshot {
    /// Estimated position in geodetic degrees.
    pub fn lat_lon(&self) -> (f64, f64) {
        LocalProjection::new(self.ref_lat, self.ref_lon).to_geodetic(self.x, self.y)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn measurement(lat: f64, lon: f64, alt: f64, ts: f64) -> Measurement {
        Measurement {
            icao: "ABC123".into(),
            lat,
            lon,
            altitude_m: alt,
            speed_mps: 0.0,
            heading_deg: 0.0,
            vertical_rate_mps: 0.0,
            callsign: "KLM123 ".into(),
            squawk: "1000".into(),
            timestamp: ts,
        }
    }

    #[test]
    fn test_initial_condition() {
        let mut m = measurement(52.0, 4.0, 10_000.0, 100.0);
        m.speed_mps = 200.0;
        m.heading_deg = 90.0;
        m.vertical_rate_mps = -5.0;
        let kf = TrackFilter::new(&m, &FilterParams::default());

        let s = kf.state();
        assert_eq!(s[0], 0.0);
        assert_eq!(s[1], 0.0);
        assert_eq!(s[2], 10_000.0);
        assert!((s[3] - 200.0).abs() < 1e-9);
        assert!(s[4].abs() < 1e-9);
        assert_eq!(s[5], -5.0);
        assert_eq!(kf.covariance()[(0, 0)], 100.0);
        assert_eq!(kf.covariance()[(0, 1)], 0.0);
        assert_eq!(kf.origin().ref_lat, 52.0);
        assert_eq!(kf.callsign, "KLM123");
        assert_eq!(kf.last_update(), 100.0);
    }

    #[test]
    fn test_transition_matrix() {
        let f = transition(2.5);
        assert_eq!(f[(0, 3)], 2.5);
        assert_eq!(f[(1, 4)], 2.5);
        assert_eq!(f[(2, 5)], 2.5);
        assert_eq!(f[(3, 3)], 1.0);
        assert_eq!(f[(0, 4)], 0.0);
        assert_eq!(f[(3, 0)], 0.0);
    }

    #[test]
    fn test_predict_zero_is_noop() {
        let mut m = measurement(52.0, 4.0, 10_000.0, 1.0);
        m.speed_mps = 150.0;
        m.heading_deg = 30.0;
        let mut kf = TrackFilter::new(&m, &FilterParams::default());
        let state = *kf.state();
        let cov = *kf.covariance();

        kf.predict(0.0);
        kf.predict(-3.0);
        kf.predict_to(0.5);

        assert_eq!(*kf.state(), state);
        assert_eq!(*kf.covariance(), cov);
        assert_eq!(kf.state_time(), 1.0);
    }

    #[test]
    fn test_predict_moves_position() {
        let mut m = measurement(52.0, 4.0, 1_000.0, 0.0);
        m.speed_mps = 100.0;
        m.heading_deg = 0.0;
        m.vertical_rate_mps = 2.0;
        let mut kf = TrackFilter::new(&m, &FilterParams::default());

        kf.predict(10.0);
        let s = kf.state();
        assert!(s[0].abs() < 1e-9);
        assert!((s[1] - 1_000.0).abs() < 1e-9);
        assert!((s[2] - 1_020.0).abs() < 1e-9);
        // P' = F P Fᵗ + Q: position variance grows by dt² · var(v)
        assert!((kf.covariance()[(0, 0)] - (100.0 + 100.0 * 100.0 + 0.1)).abs() < 1e-9);
        assert!((kf.covariance()[(0, 3)] - 1_000.0).abs() < 1e-9);
        assert_eq!(kf.state_time(), 10.0);
        assert_eq!(kf.last_update(), 0.0);
    }

    #[test]
    fn test_covariance_stays_symmetric() {
        let mut kf = TrackFilter::new(&measurement(52.0, 4.0, 1_000.0, 0.0), &FilterParams::default());
        for i in 1..20 {
            let t = i as f64;
            kf.update(52.0 + t * 1e-4, 4.0 + t * 2e-4, 1_000.0 + t, t).unwrap();
            kf.predict(0.1);
        }
        let p = kf.covariance();
        for r in 0..6 {
            assert!(p[(r, r)] > 0.0);
            for c in 0..6 {
                assert!((p[(r, c)] - p[(c, r)]).abs() < 1e-6, "P[{r}][{c}] asymmetric");
            }
        }
    }

    #[test]
    fn test_update_pulls_toward_measurement() {
        let mut kf = TrackFilter::new(&measurement(52.0, 4.0, 1_000.0, 0.0), &FilterParams::default());
        // Same instant, altitude 100 m higher
        kf.update(52.0, 4.0, 1_100.0, 0.0).unwrap();
        let alt = kf.state()[2];
        // gain = 100 / (100 + 10)
        assert!((alt - (1_000.0 + 100.0 * 100.0 / 110.0)).abs() < 1e-9);
        assert!(kf.covariance()[(2, 2)] < 100.0);
    }

    #[test]
    fn test_update_sets_timestamps() {
        let mut kf = TrackFilter::new(&measurement(52.0, 4.0, 1_000.0, 5.0), &FilterParams::default());
        kf.update(52.001, 4.0, 1_000.0, 7.5).unwrap();
        assert_eq!(kf.last_update(), 7.5);
        assert_eq!(kf.state_time(), 7.5);
    }

    #[test]
    fn test_late_update_never_rewinds_state_time() {
        let mut m = measurement(52.0, 4.0, 1_000.0, 0.0);
        m.speed_mps = 100.0;
        let mut kf = TrackFilter::new(&m, &FilterParams::default());

        // A tick predicts past the measurement that is still in flight.
        kf.predict_to(10.0);
        kf.update(52.0, 4.0, 1_000.0, 9.5).unwrap();
        assert_eq!(kf.state_time(), 10.0);
        assert_eq!(kf.last_update(), 9.5);

        // The next tick at the same instant must not extrapolate again.
        let state = *kf.state();
        kf.predict_to(10.0);
        assert_eq!(*kf.state(), state);

        kf.predict_to(11.0);
        assert_eq!(kf.state_time(), 11.0);
    }

    #[test]
    fn test_singular_update_keeps_prior_state() {
        let params = FilterParams {
            initial_variance: 0.0,
            process_noise: 0.0,
            measurement_noise: 0.0,
        };
        let mut m = measurement(52.0, 4.0, 1_000.0, 0.0);
        m.speed_mps = 50.0;
        let mut kf = TrackFilter::new(&m, &params);
        let state = *kf.state();
        let cov = *kf.covariance();

        let err = kf.update(52.01, 4.01, 1_200.0, 3.0).unwrap_err();
        assert!(matches!(err, RelayError::SingularInnovation(ref icao) if icao == "ABC123"));
        assert_eq!(*kf.state(), state);
        assert_eq!(*kf.covariance(), cov);
        assert_eq!(kf.state_time(), 0.0);
        assert_eq!(kf.last_update(), 0.0);
    }

    #[test]
    fn test_apply_overwrites_metadata() {
        let mut kf = TrackFilter::new(&measurement(52.0, 4.0, 1_000.0, 0.0), &FilterParams::default());
        let mut m = measurement(52.0, 4.0, 1_000.0, 1.0);
        m.callsign = "  NEW42 ".into();
        m.squawk = "7700".into();
        kf.apply(&m).unwrap();
        assert_eq!(kf.callsign, "NEW42");
        assert_eq!(kf.squawk, "7700");
    }

    #[test]
    fn test_convergence_straight_line() {
        // True path: 150 m/s east, 40 m/s south, climbing 5 m/s
        let (tvx, tvy, tva) = (150.0, -40.0, 5.0);
        let origin = LocalProjection::new(52.0, 4.0);
        let truth = |t: f64| {
            let (lat, lon) = origin.to_geodetic(tvx * t, tvy * t);
            (lat, lon, 3_000.0 + tva * t)
        };

        // Seeded with no velocity information at all
        let mut kf = TrackFilter::new(&measurement(52.0, 4.0, 3_000.0, 0.0), &FilterParams::default());
        for k in 1..=30 {
            let t = k as f64;
            let (lat, lon, alt) = truth(t);
            kf.update(lat, lon, alt, t).unwrap();
        }

        let s = kf.state();
        assert!((s[3] - tvx).abs() < 0.1, "vx = {}", s[3]);
        assert!((s[4] - tvy).abs() < 0.1, "vy = {}", s[4]);
        assert!((s[5] - tva).abs() < 0.1, "v_alt = {}", s[5]);

        // Coast 10 s without measurements
        kf.predict_to(40.0);
        let snap = kf.snapshot().unwrap();
        assert!((snap.x - tvx * 40.0).abs() < 1.0, "x = {}", snap.x);
        assert!((snap.y - tvy * 40.0).abs() < 1.0, "y = {}", snap.y);
        assert!((snap.altitude_m - (3_000.0 + tva * 40.0)).abs() < 1.0);

        let (lat, lon, _) = truth(40.0);
        let (elat, elon) = snap.lat_lon();
        assert!((lat - elat).abs() < 1e-4);
        assert!((lon - elon).abs() < 1e-4);
    }

    #[test]
    fn test_snapshot_rejects_non_finite() {
        let mut m = measurement(52.0, 4.0, 1_000.0, 0.0);
        m.vertical_rate_mps = f64::NAN;
        let kf = TrackFilter::new(&m, &FilterParams::default());
        assert!(matches!(kf.snapshot(), Err(RelayError::DivergedTrack(_))));
    }
}
