//! Prediction scheduler — fixed-cadence output independent of input timing.
//!
//! Every tick predicts all tracks to the current wall clock, encodes one SBS
//! line per track, and hands the lines to the hub as a single batch.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use sbs_core::sbs::encode_track;

use crate::hub::BroadcastHub;
use crate::ingest::now;
use crate::registry::TrackRegistry;

pub struct Scheduler {
    registry: Arc<TrackRegistry>,
    hub: Arc<BroadcastHub>,
    period: Duration,
    track_ttl: Option<f64>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<TrackRegistry>,
        hub: Arc<BroadcastHub>,
        period: Duration,
        track_ttl: Option<f64>,
    ) -> Self {
        Scheduler {
            registry,
            hub,
            period,
            track_ttl,
        }
    }

    /// Tick forever. A late tick is delayed rather than fired in a burst.
    pub async fn run(self) {
        info!(
            interval_ms = self.period.as_millis() as u64,
            track_ttl = ?self.track_ttl,
            "Prediction scheduler started"
        );
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.tick(now(), Local::now().naive_local()).await;
        }
    }

    /// One cycle: sweep, predict, encode, broadcast. Returns the number of
    /// lines produced.
    pub async fn tick(&self, now: f64, generated: NaiveDateTime) -> usize {
        if let Some(ttl) = self.track_ttl {
            let removed = self.registry.prune_stale(now, ttl);
            if !removed.is_empty() {
                info!(count = removed.len(), tracks = ?removed, "Dropped stale tracks");
            }
        }

        if self.registry.is_empty() {
            return 0;
        }

        // Registry lock is released before encoding.
        let snapshots = self.registry.predict_all(now);

        let mut batch = String::new();
        let mut lines = 0;
        for snap in snapshots {
            match snap {
                Ok(snap) => {
                    batch.push_str(&encode_track(&snap, generated));
                    lines += 1;
                }
                Err(e) => warn!(error = %e, "Track omitted from output"),
            }
        }

        if lines > 0 {
            let delivered = self.hub.broadcast(&batch).await;
            debug!(lines, tracks = self.registry.len(), subscribers = delivered, "Batch broadcast");
        }
        lines
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use sbs_core::{FilterParams, Measurement};
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    use crate::hub::Subscriber;

    fn measurement(icao: &str, ts: f64) -> Measurement {
        Measurement {
            icao: icao.into(),
            lat: 52.0,
            lon: 4.0,
            altitude_m: 10_000.0,
            speed_mps: 200.0,
            heading_deg: 90.0,
            vertical_rate_mps: 0.0,
            callsign: "KLM123".into(),
            squawk: "1000".into(),
            timestamp: ts,
        }
    }

    fn generated() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    async fn subscribed_hub() -> (Arc<BroadcastHub>, BufReader<TcpStream>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        let hub = Arc::new(BroadcastHub::new());
        hub.add(Subscriber::new(peer, server)).await;
        (hub, BufReader::new(client))
    }

    fn scheduler(registry: &Arc<TrackRegistry>, hub: &Arc<BroadcastHub>, ttl: Option<f64>) -> Scheduler {
        Scheduler::new(
            Arc::clone(registry),
            Arc::clone(hub),
            Duration::from_millis(100),
            ttl,
        )
    }

    #[tokio::test]
    async fn test_empty_registry_sends_nothing() {
        let registry = Arc::new(TrackRegistry::new(FilterParams::default()));
        let hub = Arc::new(BroadcastHub::new());
        assert_eq!(scheduler(&registry, &hub, None).tick(10.0, generated()).await, 0);
    }

    #[tokio::test]
    async fn test_tick_delivers_predicted_lines() {
        let registry = Arc::new(TrackRegistry::new(FilterParams::default()));
        registry.upsert(&measurement("ABC123", 10.0)).unwrap();
        let (hub, mut client) = subscribed_hub().await;

        let lines = scheduler(&registry, &hub, None).tick(10.0, generated()).await;
        assert_eq!(lines, 1);

        let mut line = String::new();
        client.read_line(&mut line).await.unwrap();
        assert_eq!(
            line,
            "MSG,3,,,ABC123,,2024/05/01,12:00:00,2024/05/01,12:00:00,KLM123,32808,389,90,52.00000,4.00000,0,1000,0,0,0,0\n"
        );
    }

    #[tokio::test]
    async fn test_tick_advances_tracks() {
        let registry = Arc::new(TrackRegistry::new(FilterParams::default()));
        registry.upsert(&measurement("ABC123", 10.0)).unwrap();
        let hub = Arc::new(BroadcastHub::new());

        scheduler(&registry, &hub, None).tick(15.0, generated()).await;
        let snap = registry.snapshot("ABC123").unwrap().unwrap();
        assert_eq!(snap.state_time, 15.0);
        assert!((snap.x - 1000.0).abs() < 1e-6);
        assert_eq!(snap.last_update, 10.0);
    }

    #[tokio::test]
    async fn test_ttl_sweep() {
        let registry = Arc::new(TrackRegistry::new(FilterParams::default()));
        registry.upsert(&measurement("OLD001", 1.0)).unwrap();
        registry.upsert(&measurement("NEW001", 95.0)).unwrap();
        let hub = Arc::new(BroadcastHub::new());

        let lines = scheduler(&registry, &hub, Some(60.0)).tick(100.0, generated()).await;
        assert_eq!(lines, 1);
        assert!(registry.snapshot("OLD001").is_none());

        // Without a TTL nothing is ever dropped.
        registry.upsert(&measurement("OLD002", 1.0)).unwrap();
        scheduler(&registry, &hub, None).tick(1000.0, generated()).await;
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_sweep_to_empty_sends_nothing() {
        let registry = Arc::new(TrackRegistry::new(FilterParams::default()));
        registry.upsert(&measurement("OLD001", 1.0)).unwrap();
        let (hub, mut client) = subscribed_hub().await;

        assert_eq!(scheduler(&registry, &hub, Some(60.0)).tick(100.0, generated()).await, 0);
        assert!(registry.is_empty());

        // Nothing was written, so the next line seen is a later batch.
        registry.upsert(&measurement("NEW001", 100.0)).unwrap();
        assert_eq!(scheduler(&registry, &hub, Some(60.0)).tick(100.0, generated()).await, 1);
        let mut line = String::new();
        client.read_line(&mut line).await.unwrap();
        assert!(line.starts_with("MSG,3,,,NEW001,"));
    }

    #[tokio::test]
    async fn test_diverged_track_omitted() {
        let registry = Arc::new(TrackRegistry::new(FilterParams::default()));
        let mut bad = measurement("BAD000", 1.0);
        bad.speed_mps = f64::NAN;
        registry.upsert(&bad).unwrap();
        registry.upsert(&measurement("ABC123", 1.0)).unwrap();
        let hub = Arc::new(BroadcastHub::new());

        assert_eq!(scheduler(&registry, &hub, None).tick(2.0, generated()).await, 1);
    }

    #[tokio::test]
    async fn test_run_emits_on_cadence() {
        let registry = Arc::new(TrackRegistry::new(FilterParams::default()));
        registry.upsert(&measurement("ABC123", now())).unwrap();
        let (hub, mut client) = subscribed_hub().await;

        let sched = Scheduler::new(
            Arc::clone(&registry),
            Arc::clone(&hub),
            Duration::from_millis(20),
            None,
        );
        let task = tokio::spawn(sched.run());

        for _ in 0..3 {
            let mut line = String::new();
            tokio::time::timeout(Duration::from_secs(5), client.read_line(&mut line))
                .await
                .expect("no tick within 5s")
                .unwrap();
            assert!(line.starts_with("MSG,3,,,ABC123,"));
        }
        task.abort();
    }
}
