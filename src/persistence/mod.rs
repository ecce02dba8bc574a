//! Persistence layer: principals, tracked listings, versioned snapshots.
//!
//! [`SnapshotStore`] and [`PrincipalStore`] describe durable storage. The
//! PostgreSQL implementation ([`PgStore`]) enforces uniqueness through named
//! constraints; [`MemoryStore`] mirrors the same contract in process.
//!
//! Snapshots are append-only. Versions per listing are assigned as
//! `max(version) + 1`; a concurrent writer that loses the race gets
//! [`TrackerError::VersionConflict`](crate::error::TrackerError::VersionConflict)
//! and nothing is written. Retrying is the caller's decision.

use std::fmt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{Listing, ListingId, PrincipalId, ProductRecord, Snapshot, SnapshotVersion};
use crate::error::TrackerError;

pub mod memory;
pub mod models;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Storage of tracked listings and their snapshot history.
#[async_trait]
pub trait SnapshotStore: fmt::Debug + Send + Sync {
    /// Starts tracking `url` for `owner`.
    ///
    /// # Errors
    ///
    /// - [`TrackerError::AlreadyTracked`] if `owner` already tracks `url`.
    /// - [`TrackerError::PrincipalNotFound`] if `owner` does not exist.
    /// - [`TrackerError::PersistenceError`] on storage failure.
    async fn track_listing(&self, owner: PrincipalId, url: &str) -> Result<Listing, TrackerError>;

    /// Returns the listings tracked by `owner`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::PersistenceError`] on storage failure.
    async fn listings_for(&self, owner: PrincipalId) -> Result<Vec<Listing>, TrackerError>;

    /// Appends a snapshot of `record` under the next version of `listing`.
    ///
    /// Version computation and insert are atomic: either the snapshot is
    /// stored under `max + 1` or nothing is written.
    ///
    /// # Errors
    ///
    /// - [`TrackerError::VersionConflict`] if another writer took the version.
    /// - [`TrackerError::ListingNotFound`] if `listing` does not exist.
    /// - [`TrackerError::PriceOutOfRange`] if the price has no minor-unit form.
    /// - [`TrackerError::Cancelled`] if `cancel` fired before commit.
    /// - [`TrackerError::PersistenceError`] on storage failure.
    async fn append_snapshot(
        &self,
        listing: ListingId,
        record: &ProductRecord,
        cancel: &CancellationToken,
    ) -> Result<SnapshotVersion, TrackerError>;

    /// Returns the snapshots of `listing`, highest version first.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::PersistenceError`] on storage failure.
    async fn snapshots_for(&self, listing: ListingId) -> Result<Vec<Snapshot>, TrackerError>;
}

/// Storage of principals and their credentials.
#[async_trait]
pub trait PrincipalStore: fmt::Debug + Send + Sync {
    /// Registers a principal with a bcrypt password hash.
    ///
    /// # Errors
    ///
    /// - [`TrackerError::PrincipalExists`] if the username is taken.
    /// - [`TrackerError::PersistenceError`] on storage failure.
    async fn create_principal(
        &self,
        username: &str,
        password: &str,
    ) -> Result<PrincipalId, TrackerError>;

    /// Resolves a username and password to a principal.
    ///
    /// # Errors
    ///
    /// - [`TrackerError::InvalidCredentials`] for an unknown username or a
    ///   wrong password.
    /// - [`TrackerError::PersistenceError`] on storage failure.
    async fn authenticate(&self, username: &str, password: &str)
    -> Result<PrincipalId, TrackerError>;
}
