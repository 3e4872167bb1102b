//! UDP ingest loop — one JSON document per datagram.
//!
//! The loop never terminates on bad input: receive errors, malformed JSON,
//! and bad entries are logged and skipped. Decoded reports go to a
//! [`ReportHandler`] (the track registry, or the passthrough relay).

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use sbs_core::report::{decode_datagram, MAX_DATAGRAM_SIZE};
use sbs_core::{AircraftReport, RelayError};

/// Consumer of decoded reports.
#[async_trait]
pub trait ReportHandler: Send + Sync {
    /// Handle every report from one datagram. `received_at` is the wall
    /// clock at receipt, seconds since the Unix epoch.
    async fn handle(&self, reports: Vec<AircraftReport>, received_at: f64);
}

/// Wall clock as seconds since the Unix epoch.
pub fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Bind the inbound socket on all interfaces.
pub async fn bind(port: u16) -> std::io::Result<UdpSocket> {
    UdpSocket::bind(("0.0.0.0", port)).await
}

/// Receive datagrams forever, handing decoded reports to `handler`.
pub async fn run_ingest(socket: UdpSocket, handler: Arc<dyn ReportHandler>) {
    let local_addr = socket.local_addr().ok();
    info!(local_addr = ?local_addr, "Ingest listening for UDP reports");

    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut datagrams: u64 = 0;

    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "UDP receive failed");
                continue;
            }
        };
        let received_at = now();
        datagrams += 1;

        let batch = match decode_datagram(&buf[..len]) {
            Ok(b) => b,
            Err(RelayError::MissingAircraft) => {
                warn!(%peer, len, "Datagram has no aircraft array, ignored");
                continue;
            }
            Err(e) => {
                warn!(%peer, len, error = %e, "Undecodable datagram, ignored");
                continue;
            }
        };

        for rejected in &batch.rejected {
            debug!(%peer, error = %rejected, "Skipping entry");
        }
        debug!(
            %peer,
            datagram = datagrams,
            reports = batch.reports.len(),
            "Datagram received"
        );

        if !batch.reports.is_empty() {
            handler.handle(batch.reports, received_at).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
