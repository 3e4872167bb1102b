//! sbs-core: Pure tracking + encoding library for the SBS relay.
//!
//! No async, no I/O — just algorithms. Report decoding, per-aircraft Kalman
//! filtering in a local tangent plane, and BaseStation line encoding. The
//! `sbs-relay` binary owns the sockets, tasks, and locking.

pub mod config;
pub mod kalman;
pub mod projection;
pub mod report;
pub mod sbs;
pub mod tracker;
pub mod types;

// Re-export commonly used types at crate root
pub use kalman::{FilterParams, TrackFilter, TrackSnapshot};
pub use projection::LocalProjection;
pub use report::{decode_datagram, AircraftReport, ReportBatch};
pub use sbs::{encode_report, encode_track};
pub use tracker::{Tracker, Upsert};
pub use types::*;
