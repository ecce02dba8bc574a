//! Database rows for principals, listings and snapshots.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    Availability, Listing, ListingId, PrincipalId, Snapshot, SnapshotId, SnapshotVersion,
};
use crate::error::TrackerError;

/// A row from the `principals` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PrincipalRow {
    /// Principal ID.
    pub id: Uuid,
    /// Unique login name.
    pub username: String,
    /// bcrypt hash string, `"$2b$<cost>$<salt+digest>"`.
    pub password_hash: String,
    /// Registration timestamp.
    pub created_at: DateTime<Utc>,
}

/// A row from the `listings` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ListingRow {
    /// Listing ID.
    pub id: Uuid,
    /// Owning principal.
    pub owner_id: Uuid,
    /// Tracked URL.
    pub url: String,
    /// When tracking started.
    pub created_at: DateTime<Utc>,
}

impl From<ListingRow> for Listing {
    fn from(row: ListingRow) -> Self {
        Self {
            id: ListingId::from(row.id),
            owner_id: PrincipalId::from(row.owner_id),
            url: row.url,
            created_at: row.created_at,
        }
    }
}

/// A row from the `snapshots` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SnapshotRow {
    /// Snapshot ID.
    pub id: Uuid,
    /// Listing the snapshot belongs to.
    pub listing_id: Uuid,
    /// Per-listing version, always positive.
    pub version: i32,
    /// Storage timestamp.
    pub retrieved_at: DateTime<Utc>,
    /// Listing title.
    pub name: String,
    /// Listing description.
    pub description: String,
    /// Price in minor currency units.
    pub price_minor_units: i64,
    /// Currency code.
    pub currency: String,
    /// Availability as stored (`in_stock`, ...).
    pub availability: String,
    /// Full structured-data payload as JSONB.
    pub raw_payload: serde_json::Value,
}

impl TryFrom<SnapshotRow> for Snapshot {
    type Error = TrackerError;

    fn try_from(row: SnapshotRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: SnapshotId::from(row.id),
            listing_id: ListingId::from(row.listing_id),
            version: SnapshotVersion::try_from(row.version)?,
            retrieved_at: row.retrieved_at,
            name: row.name,
            description: row.description,
            price_minor_units: row.price_minor_units,
            currency: row.currency,
            availability: Availability::from_source(&row.availability),
            raw_payload: row.raw_payload,
        })
    }
}
