//! Track registry — the shared, synchronized table of track filters.
//!
//! Wraps the pure `Tracker` in a mutex. Each operation is one critical
//! section and the lock is never held across an `.await`.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{debug, warn};

use sbs_core::{AircraftReport, FilterParams, Measurement, Result, TrackSnapshot, Tracker, Upsert};

use crate::ingest::ReportHandler;

/// Counters for the shutdown summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub tracks: usize,
    pub measurements: u64,
    pub rejected_updates: u64,
}

pub struct TrackRegistry {
    tracker: Mutex<Tracker>,
}

impl TrackRegistry {
    pub fn new(params: FilterParams) -> Self {
        TrackRegistry {
            tracker: Mutex::new(Tracker::new(params)),
        }
    }

    // A panic while holding the lock leaves the table intact, so keep going.
    fn lock(&self) -> MutexGuard<'_, Tracker> {
        self.tracker.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create or update the track for one measurement.
    pub fn upsert(&self, m: &Measurement) -> Result<Upsert> {
        self.lock().upsert(m)
    }

    /// Predict every track to `now` and snapshot it, in one critical section.
    pub fn predict_all(&self, now: f64) -> Vec<Result<TrackSnapshot>> {
        self.lock().predict_all(now)
    }

    /// Drop tracks without a measurement for more than `ttl` seconds.
    /// Returns the removed addresses.
    pub fn prune_stale(&self, now: f64, ttl: f64) -> Vec<String> {
        self.lock().prune_stale(now, ttl)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Current state of one track, without predicting.
    pub fn snapshot(&self, icao: &str) -> Option<Result<TrackSnapshot>> {
        self.lock().get(icao).map(|t| t.snapshot())
    }

    pub fn stats(&self) -> RegistryStats {
        let tracker = self.lock();
        RegistryStats {
            tracks: tracker.len(),
            measurements: tracker.measurements,
            rejected_updates: tracker.rejected_updates,
        }
    }

    /// Validate one report and fold it into its track, logging failures.
    fn ingest_report(&self, report: &AircraftReport, received_at: f64) {
        let m = match report.to_measurement(received_at) {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "Skipping report");
                return;
            }
        };
        match self.upsert(&m) {
            Ok(Upsert::Created) => {
                if let Some(Ok(snap)) = self.snapshot(&m.icao) {
                    debug!(
                        icao = %snap.icao,
                        callsign = %snap.callsign,
                        ref_lat = snap.ref_lat,
                        ref_lon = snap.ref_lon,
                        "New track"
                    );
                }
            }
            Ok(Upsert::Updated) => {}
            Err(e) => warn!(icao = %m.icao, error = %e, "Track update rejected"),
        }
    }
}

#[async_trait]
impl ReportHandler for TrackRegistry {
    async fn handle(&self, reports: Vec<AircraftReport>, received_at: f64) {
        for report in &reports {
            self.ingest_report(report, received_at);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
