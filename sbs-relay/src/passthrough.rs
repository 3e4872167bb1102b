//! Passthrough relay — reports straight to SBS lines, no filtering.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use sbs_core::normalize_icao;
use sbs_core::sbs::encode_report;
use sbs_core::AircraftReport;

use crate::hub::BroadcastHub;
use crate::ingest::ReportHandler;

pub struct PassthroughRelay {
    hub: Arc<BroadcastHub>,
}

impl PassthroughRelay {
    pub fn new(hub: Arc<BroadcastHub>) -> Self {
        PassthroughRelay { hub }
    }

    /// Encode every addressable report from one datagram into one batch.
    pub fn encode_batch(reports: &[AircraftReport]) -> String {
        reports
            .iter()
            .filter(|r| r.icao_address.as_deref().and_then(normalize_icao).is_some())
            .map(encode_report)
            .collect()
    }
}

#[async_trait]
impl ReportHandler for PassthroughRelay {
    async fn handle(&self, reports: Vec<AircraftReport>, _received_at: f64) {
        let batch = Self::encode_batch(&reports);
        if batch.is_empty() {
            return;
        }
        let delivered = self.hub.broadcast(&batch).await;
        debug!(reports = reports.len(), subscribers = delivered, "Passthrough batch");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
