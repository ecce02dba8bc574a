//! Service layer: ingestion orchestration.
//!
//! [`IngestService`] tracks listings, fetches them through a
//! [`ProductSource`](crate::fetch::ProductSource), and appends snapshots to
//! a [`SnapshotStore`](crate::persistence::SnapshotStore).

pub mod ingest_service;

pub use ingest_service::{IngestReport, IngestService, TrackOutcome};
