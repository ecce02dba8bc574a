//! Versioned snapshots of a listing's product data.
//!
//! A [`Snapshot`] is one immutable observation of a listing. For a given
//! listing, versions start at 1 and increase by one per appended snapshot.
//! Prices are stored as integer minor currency units so that repeated
//! observations of the same price compare equal.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use super::{Availability, ListingId, ProductRecord, SnapshotId};
use crate::error::TrackerError;

/// Minor units per major currency unit (cents per unit).
const MINOR_UNITS_PER_MAJOR: Decimal = Decimal::ONE_HUNDRED;

/// Strictly positive, per-listing snapshot version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct SnapshotVersion(i32);

impl SnapshotVersion {
    /// The version assigned to a listing's first snapshot.
    pub const FIRST: Self = Self(1);

    /// Creates a version, returning `None` unless `value` is positive.
    #[must_use]
    pub const fn new(value: i32) -> Option<Self> {
        if value > 0 { Some(Self(value)) } else { None }
    }

    /// Returns the version that follows `current_max`, where `0` means the
    /// listing has no snapshots yet.
    ///
    /// Returns `None` if `current_max` is negative or the counter would
    /// overflow.
    #[must_use]
    pub fn after(current_max: i32) -> Option<Self> {
        if current_max < 0 {
            return None;
        }
        current_max.checked_add(1).and_then(Self::new)
    }

    /// Returns the next version.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        Self::after(self.0)
    }

    /// Returns the numeric version.
    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }
}

impl TryFrom<i32> for SnapshotVersion {
    type Error = TrackerError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| {
            TrackerError::PersistenceError(format!("invalid snapshot version {value}"))
        })
    }
}

impl From<SnapshotVersion> for i32 {
    fn from(version: SnapshotVersion) -> Self {
        version.0
    }
}

impl std::fmt::Display for SnapshotVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Converts a decimal price to integer minor units, truncating toward zero.
///
/// Returns `None` if the result does not fit in an `i64`.
#[must_use]
pub fn to_minor_units(price: Decimal) -> Option<i64> {
    price
        .checked_mul(MINOR_UNITS_PER_MAJOR)
        .and_then(|minor| minor.trunc().to_i64())
}

/// Denormalized snapshot fields derived from a [`ProductRecord`], ready to be
/// inserted under a version.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSnapshot {
    /// Listing title.
    pub name: String,
    /// Listing description.
    pub description: String,
    /// Price in minor currency units.
    pub price_minor_units: i64,
    /// ISO 4217 currency code, stored unconverted.
    pub currency: String,
    /// Normalized availability.
    pub availability: Availability,
    /// Full structured-data payload.
    pub raw_payload: serde_json::Value,
}

impl NewSnapshot {
    /// Builds the row fields for `record`.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::PriceOutOfRange`] if the price cannot be
    /// represented in minor units, or [`TrackerError::Internal`] if the
    /// record cannot be serialized for the raw payload.
    pub fn from_record(record: &ProductRecord) -> Result<Self, TrackerError> {
        let price = record.offers.price;
        let price_minor_units =
            to_minor_units(price).ok_or(TrackerError::PriceOutOfRange(price))?;
        let raw_payload = record
            .payload_for_storage()
            .map_err(|e| TrackerError::Internal(e.to_string()))?;

        Ok(Self {
            name: record.name.clone(),
            description: record.description.clone(),
            price_minor_units,
            currency: record.offers.price_currency.clone(),
            availability: record.offers.availability,
            raw_payload,
        })
    }
}

/// Persisted, immutable snapshot of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Row identifier.
    pub id: SnapshotId,
    /// Listing this snapshot belongs to.
    pub listing_id: ListingId,
    /// Per-listing version.
    pub version: SnapshotVersion,
    /// When the snapshot was stored.
    pub retrieved_at: DateTime<Utc>,
    /// Listing title.
    pub name: String,
    /// Listing description.
    pub description: String,
    /// Price in minor currency units.
    pub price_minor_units: i64,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Normalized availability.
    pub availability: Availability,
    /// Full structured-data payload.
    pub raw_payload: serde_json::Value,
}

impl Snapshot {
    /// Assembles a snapshot from its row fields and assigned version.
    #[must_use]
    pub fn assemble(
        listing_id: ListingId,
        version: SnapshotVersion,
        retrieved_at: DateTime<Utc>,
        fields: NewSnapshot,
    ) -> Self {
        Self {
            id: SnapshotId::new(),
            listing_id,
            version,
            retrieved_at,
            name: fields.name,
            description: fields.description,
            price_minor_units: fields.price_minor_units,
            currency: fields.currency,
            availability: fields.availability,
            raw_payload: fields.raw_payload,
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minor_units_truncate_toward_zero() {
        assert_eq!(to_minor_units(Decimal::new(4999, 2)), Some(4999));
        assert_eq!(to_minor_units(Decimal::new(12_345, 3)), Some(1234));
        assert_eq!(to_minor_units(Decimal::new(-12_345, 3)), Some(-1234));
        assert_eq!(to_minor_units(Decimal::ZERO), Some(0));
    }

    #[test]
    fn minor_units_reject_overflow() {
        assert_eq!(to_minor_units(Decimal::MAX), None);
    }

    #[test]
    fn version_sequence() {
        assert_eq!(SnapshotVersion::after(0), Some(SnapshotVersion::FIRST));
        assert_eq!(SnapshotVersion::FIRST.next().map(SnapshotVersion::get), Some(2));
        assert_eq!(SnapshotVersion::after(i32::MAX), None);
        assert_eq!(SnapshotVersion::after(-1), None);
        assert_eq!(SnapshotVersion::new(0), None);
        assert!(SnapshotVersion::try_from(0).is_err());
    }

    #[test]
    fn new_snapshot_from_decoded_record() {
        let Ok(record) = ProductRecord::from_payload(json!({
            "name": "Mouse",
            "description": "wireless",
            "offers": {"price": 49.99, "priceCurrency": "RON", "availability": "InStock"}
        })) else {
            panic!("decode failed");
        };
        let Ok(fields) = NewSnapshot::from_record(&record) else {
            panic!("conversion failed");
        };
        assert_eq!(fields.name, "Mouse");
        assert_eq!(fields.price_minor_units, 4999);
        assert_eq!(fields.currency, "RON");
        assert_eq!(fields.availability, Availability::InStock);
        assert_eq!(&fields.raw_payload, record.raw_payload());
    }

    #[test]
    fn new_snapshot_rejects_unrepresentable_price() {
        let mut record = ProductRecord::default();
        record.offers.price = Decimal::MAX;
        let result = NewSnapshot::from_record(&record);
        assert!(matches!(result, Err(TrackerError::PriceOutOfRange(_))));
    }
}
