//! Domain layer: identifiers, product records, listings, and snapshots.
//!
//! These types are shared by the extractor, the stores, and the ingestion
//! service. None of them performs I/O.

pub mod credential;
pub mod ids;
pub mod listing;
pub mod product;
pub mod snapshot;

pub use ids::{ListingId, PrincipalId, SnapshotId};
pub use listing::Listing;
pub use product::{Area, Availability, MonetaryAmount, Offer, ProductRecord, Region, Shipping};
pub use snapshot::{NewSnapshot, Snapshot, SnapshotVersion, to_minor_units};
