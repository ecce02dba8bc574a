//! PostgreSQL implementation of the stores.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::models::{ListingRow, PrincipalRow, SnapshotRow};
use super::{PrincipalStore, SnapshotStore};
use crate::config::TrackerConfig;
use crate::domain::credential::{
    DEFAULT_HASH_COST, hash_password_task, verify_password_task,
};
use crate::domain::{
    Listing, ListingId, NewSnapshot, PrincipalId, ProductRecord, Snapshot, SnapshotId,
    SnapshotVersion,
};
use crate::error::TrackerError;

/// Unique `(owner_id, url)` on `listings`.
const LISTING_URL_CONSTRAINT: &str = "listings_owner_url_unique";
/// Foreign key `listings.owner_id -> principals.id`.
const LISTING_OWNER_FK: &str = "listings_owner_fk";
/// Unique `(listing_id, version)` on `snapshots`.
const SNAPSHOT_VERSION_CONSTRAINT: &str = "snapshots_listing_version_unique";
/// Foreign key `snapshots.listing_id -> listings.id`.
const SNAPSHOT_LISTING_FK: &str = "snapshots_listing_fk";
/// Unique `username` on `principals`.
const PRINCIPAL_USERNAME_CONSTRAINT: &str = "principals_username_unique";

const MAX_VERSION_SQL: &str =
    "SELECT COALESCE(MAX(version), 0) FROM snapshots WHERE listing_id = $1";

const INSERT_SNAPSHOT_SQL: &str = "INSERT INTO snapshots \
     (id, listing_id, version, retrieved_at, name, description, price_minor_units, currency, availability, raw_payload) \
     VALUES ($1, $2, $3, now(), $4, $5, $6, $7, $8, $9)";

/// PostgreSQL-backed store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    hash_cost: u32,
}

impl PgStore {
    /// Creates a store over an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            hash_cost: DEFAULT_HASH_COST,
        }
    }

    /// Overrides the bcrypt cost used for new principals.
    #[must_use]
    pub fn with_hash_cost(mut self, cost: u32) -> Self {
        self.hash_cost = cost;
        self
    }

    /// Connects a pool sized from `config`.
    ///
    /// # Errors
    ///
    /// Returns a [`TrackerError::PersistenceError`] if the connection cannot
    /// be established.
    pub async fn connect(config: &TrackerConfig) -> Result<Self, TrackerError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(config.database_connect_timeout())
            .connect(&config.database_url)
            .await
            .map_err(persistence_error)?;
        Ok(Self::new(pool).with_hash_cost(config.password_hash_cost))
    }

    /// Applies the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns a [`TrackerError::PersistenceError`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), TrackerError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| TrackerError::PersistenceError(e.to_string()))
    }

    /// Returns the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Reads the current maximum and inserts under `max + 1` in one
    /// transaction. A dropped transaction rolls back.
    async fn append_in_transaction(
        &self,
        listing: ListingId,
        fields: NewSnapshot,
    ) -> Result<SnapshotVersion, TrackerError> {
        let mut tx = self.pool.begin().await.map_err(persistence_error)?;

        let current = sqlx::query_scalar::<_, i32>(MAX_VERSION_SQL)
            .bind(Uuid::from(listing))
            .fetch_one(&mut *tx)
            .await
            .map_err(persistence_error)?;
        let version = SnapshotVersion::after(current).ok_or_else(|| {
            TrackerError::PersistenceError(format!("version counter exhausted for {listing}"))
        })?;

        let inserted = sqlx::query(INSERT_SNAPSHOT_SQL)
            .bind(Uuid::from(SnapshotId::new()))
            .bind(Uuid::from(listing))
            .bind(version.get())
            .bind(&fields.name)
            .bind(&fields.description)
            .bind(fields.price_minor_units)
            .bind(&fields.currency)
            .bind(fields.availability.as_str())
            .bind(&fields.raw_payload)
            .execute(&mut *tx)
            .await;

        if let Err(e) = inserted {
            let err = match violated_constraint(&e).as_deref() {
                Some(SNAPSHOT_VERSION_CONSTRAINT) => {
                    TrackerError::VersionConflict { listing, version }
                }
                Some(SNAPSHOT_LISTING_FK) => TrackerError::ListingNotFound(listing),
                _ => persistence_error(e),
            };
            return Err(settle_rollback(err, tx.rollback().await));
        }

        tx.commit().await.map_err(persistence_error)?;
        Ok(version)
    }
}

#[async_trait]
impl SnapshotStore for PgStore {
    async fn track_listing(&self, owner: PrincipalId, url: &str) -> Result<Listing, TrackerError> {
        let listing = Listing::new(owner, url);
        let inserted = sqlx::query(
            "INSERT INTO listings (id, owner_id, url, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::from(listing.id))
        .bind(Uuid::from(owner))
        .bind(&listing.url)
        .bind(listing.created_at)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(listing),
            Err(e) => Err(match violated_constraint(&e).as_deref() {
                Some(LISTING_URL_CONSTRAINT) => TrackerError::AlreadyTracked {
                    owner,
                    url: url.to_string(),
                },
                Some(LISTING_OWNER_FK) => TrackerError::PrincipalNotFound(owner),
                _ => persistence_error(e),
            }),
        }
    }

    async fn listings_for(&self, owner: PrincipalId) -> Result<Vec<Listing>, TrackerError> {
        let rows = sqlx::query_as::<_, ListingRow>(
            "SELECT id, owner_id, url, created_at FROM listings \
             WHERE owner_id = $1 ORDER BY created_at DESC, id",
        )
        .bind(Uuid::from(owner))
        .fetch_all(&self.pool)
        .await
        .map_err(persistence_error)?;

        Ok(rows.into_iter().map(Listing::from).collect())
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
            result = self.append_in_transaction(listing, fields) => result,
        }
    }

    async fn snapshots_for(&self, listing: ListingId) -> Result<Vec<Snapshot>, TrackerError> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            "SELECT id, listing_id, version, retrieved_at, name, description, \
             price_minor_units, currency, availability, raw_payload \
             FROM snapshots WHERE listing_id = $1 ORDER BY version DESC",
        )
        .bind(Uuid::from(listing))
        .fetch_all(&self.pool)
        .await
        .map_err(persistence_error)?;

        rows.into_iter().map(Snapshot::try_from).collect()
    }
}

#[async_trait]
impl PrincipalStore for PgStore {
    async fn create_principal(
        &self,
        username: &str,
        password: &str,
    ) -> Result<PrincipalId, TrackerError> {
        let id = PrincipalId::new();
        let stored = hash_password_task(password, self.hash_cost).await?;
        let inserted =
            sqlx::query("INSERT INTO principals (id, username, password_hash) VALUES ($1, $2, $3)")
                .bind(Uuid::from(id))
                .bind(username)
                .bind(stored)
                .execute(&self.pool)
                .await;

        match inserted {
            Ok(_) => Ok(id),
            Err(e) => Err(match violated_constraint(&e).as_deref() {
                Some(PRINCIPAL_USERNAME_CONSTRAINT) => {
                    TrackerError::PrincipalExists(username.to_string())
                }
                _ => persistence_error(e),
            }),
        }
    }

    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<PrincipalId, TrackerError> {
        let row = sqlx::query_as::<_, PrincipalRow>(
            "SELECT id, username, password_hash, created_at FROM principals WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence_error)?;

        let Some(row) = row else {
            return Err(TrackerError::InvalidCredentials);
        };
        if verify_password_task(row.password_hash, password).await {
            Ok(PrincipalId::from(row.id))
        } else {
            Err(TrackerError::InvalidCredentials)
        }
    }
}

fn persistence_error(e: sqlx::Error) -> TrackerError {
    TrackerError::PersistenceError(e.to_string())
}

/// Keeps the typed failure of an aborted transaction when the rollback
/// itself also fails.
fn settle_rollback(err: TrackerError, rollback: Result<(), sqlx::Error>) -> TrackerError {
    if let Err(e) = rollback {
        tracing::warn!(error = %e, cause = %err, "transaction rollback failed");
    }
    err
}

/// Returns the constraint named by a unique or foreign-key violation.
fn violated_constraint(e: &sqlx::Error) -> Option<String> {
    match e {
        sqlx::Error::Database(db) if db.is_unique_violation() || db.is_foreign_key_violation() => {
            db.constraint().map(str::to_string)
        }
        _ => None,
    }
}
