//! Keyed collection of track filters with create-or-update semantics.
//!
//! Pure logic — no locking, no I/O. The relay wraps a `Tracker` in its
//! synchronized registry; tests drive it directly.

use std::collections::HashMap;

use crate::kalman::{FilterParams, TrackFilter, TrackSnapshot};
use crate::types::{Measurement, Result};

/// What `Tracker::upsert` did with a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// First fix for this address; a new track was started.
    Created,
    /// Existing track updated.
    Updated,
}

/// All tracked aircraft, keyed by normalized address.
pub struct Tracker {
    params: FilterParams,
    tracks: HashMap<String, TrackFilter>,

    // Counters
    pub measurements: u64,
    pub rejected_updates: u64,
}

impl Tracker {
    pub fn new(params: FilterParams) -> Self {
        Tracker {
            params,
            tracks: HashMap::new(),
            measurements: 0,
            rejected_updates: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, icao: &str) -> Option<&TrackFilter> {
        self.tracks.get(icao)
    }

    /// Create the track on first sight, otherwise update it in place.
    ///
    /// A failed update (singular innovation) leaves the track as it was and
    /// is returned to the caller.
    pub fn upsert(&mut self, m: &Measurement) -> Result<Upsert> {
        self.measurements += 1;
        match self.tracks.get_mut(&m.icao) {
            Some(track) => {
                if let Err(e) = track.apply(m) {
                    self.rejected_updates += 1;
                    return Err(e);
                }
                Ok(Upsert::Updated)
            }
            None => {
                self.tracks
                    .insert(m.icao.clone(), TrackFilter::new(m, &self.params));
                Ok(Upsert::Created)
            }
        }
    }

    /// Predict every track forward to `now` and snapshot it.
    ///
    /// Diverged tracks come back as errors so the caller can log and skip
    /// them without losing the rest. Output is sorted by address.
    pub fn predict_all(&mut self, now: f64) -> Vec<Result<TrackSnapshot>> {
        let mut out: Vec<(&String, Result<TrackSnapshot>)> = self
            .tracks
            .iter_mut()
            .map(|(icao, track)| {
                track.predict_to(now);
                (icao, track.snapshot())
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(b.0));
        out.into_iter().map(|(_, snap)| snap).collect()
    }

    /// Remove tracks with no measurement for more than `ttl` seconds.
    /// Returns the removed addresses.
    pub fn prune_stale(&mut self, now: f64, ttl: f64) -> Vec<String> {
        let stale: Vec<String> = self
            .tracks
            .iter()
            .filter(|(_, t)| now - t.last_update() > ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for k in &stale {
            self.tracks.remove(k);
        }
        stale
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new(FilterParams::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
