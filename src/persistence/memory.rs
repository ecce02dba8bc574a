//! In-process implementation of the stores.
//!
//! Mirrors [`PgStore`](super::PgStore): the per-listing version map plays
//! the role of the `(listing_id, version)` unique constraint, and the
//! maximum is read and the insert performed under separate lock
//! acquisitions, so concurrent writers see the same conflicts they would
//! against the database.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::{PrincipalStore, SnapshotStore};
use crate::domain::credential::{
    DEFAULT_HASH_COST, hash_password_task, verify_password_task,
};
use crate::domain::{
    Listing, ListingId, NewSnapshot, PrincipalId, ProductRecord, Snapshot, SnapshotVersion,
};
use crate::error::TrackerError;

/// Store backed by `tokio::sync::RwLock`-guarded maps.
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    hash_cost: u32,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    principals: HashMap<String, (PrincipalId, String)>,
    listings: HashMap<ListingId, Listing>,
    snapshots: HashMap<ListingId, BTreeMap<SnapshotVersion, Snapshot>>,
}

impl MemoryState {
    fn has_principal(&self, id: PrincipalId) -> bool {
        self.principals.values().any(|(pid, _)| *pid == id)
    }
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::default(),
            hash_cost: DEFAULT_HASH_COST,
        }
    }

    /// Overrides the bcrypt cost used for new principals.
    #[must_use]
    pub fn with_hash_cost(mut self, cost: u32) -> Self {
        self.hash_cost = cost;
        self
    }

    async fn append_fields(
        &self,
        listing: ListingId,
        fields: NewSnapshot,
    ) -> Result<SnapshotVersion, TrackerError> {
        let current = {
            let state = self.state.read().await;
            if !state.listings.contains_key(&listing) {
                return Err(TrackerError::ListingNotFound(listing));
            }
            state
                .snapshots
                .get(&listing)
                .and_then(|history| history.keys().next_back())
                .map_or(0, |version| version.get())
        };
        let version = SnapshotVersion::after(current).ok_or_else(|| {
            TrackerError::PersistenceError(format!("version counter exhausted for {listing}"))
        })?;

        // Let other writers interleave between the read and the insert.
        tokio::task::yield_now().await;

        let mut state = self.state.write().await;
        if !state.listings.contains_key(&listing) {
            return Err(TrackerError::ListingNotFound(listing));
        }
        let history = state.snapshots.entry(listing).or_default();
        if history.contains_key(&version) {
            return Err(TrackerError::VersionConflict { listing, version });
        }
        history.insert(
            version,
            Snapshot::assemble(listing, version, Utc::now(), fields),
        );
        Ok(version)
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn track_listing(&self, owner: PrincipalId, url: &str) -> Result<Listing, TrackerError> {
        let mut state = self.state.write().await;
        if !state.has_principal(owner) {
            return Err(TrackerError::PrincipalNotFound(owner));
        }
        if state
            .listings
            .values()
            .any(|l| l.owner_id == owner && l.url == url)
        {
            return Err(TrackerError::AlreadyTracked {
                owner,
                url: url.to_string(),
            });
        }
        let listing = Listing::new(owner, url);
        state.listings.insert(listing.id, listing.clone());
        Ok(listing)
    }

    async fn listings_for(&self, owner: PrincipalId) -> Result<Vec<Listing>, TrackerError> {
        let state = self.state.read().await;
        let mut listings: Vec<Listing> = state
            .listings
            .values()
            .filter(|l| l.owner_id == owner)
            .cloned()
            .collect();
        listings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(listings)
    }

    async fn append_snapshot(
        &self,
        listing: ListingId,
        record: &ProductRecord,
        cancel: &CancellationToken,
    ) -> Result<SnapshotVersion, TrackerError> {
        let fields = NewSnapshot::from_record(record)?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TrackerError::Cancelled),
            result = self.append_fields(listing, fields) => result,
        }
    }

    async fn snapshots_for(&self, listing: ListingId) -> Result<Vec<Snapshot>, TrackerError> {
        let state = self.state.read().await;
        Ok(state
            .snapshots
            .get(&listing)
            .map(|history| history.values().rev().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl PrincipalStore for MemoryStore {
    async fn create_principal(
        &self,
        username: &str,
        password: &str,
    ) -> Result<PrincipalId, TrackerError> {
        let stored = hash_password_task(password, self.hash_cost).await?;
        let mut state = self.state.write().await;
        if state.principals.contains_key(username) {
            return Err(TrackerError::PrincipalExists(username.to_string()));
        }
        let id = PrincipalId::new();
        state.principals.insert(username.to_string(), (id, stored));
        Ok(id)
    }

    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<PrincipalId, TrackerError> {
        let found = self.state.read().await.principals.get(username).cloned();
        let Some((id, stored)) = found else {
            return Err(TrackerError::InvalidCredentials);
        };
        if verify_password_task(stored, password).await {
            Ok(id)
        } else {
            Err(TrackerError::InvalidCredentials)
        }
    }
}
