//! Tracked listing entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ListingId, PrincipalId};

/// A marketplace URL tracked by a principal.
///
/// Created on the first tracking request and never mutated afterwards. A
/// principal may track a given URL at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    /// Listing identifier.
    pub id: ListingId,
    /// Principal that tracks the listing.
    pub owner_id: PrincipalId,
    /// Canonical listing URL.
    pub url: String,
    /// When the listing started being tracked.
    pub created_at: DateTime<Utc>,
}

impl Listing {
    /// Creates a new listing with a fresh identifier.
    #[must_use]
    pub fn new(owner_id: PrincipalId, url: impl Into<String>) -> Self {
        Self {
            id: ListingId::new(),
            owner_id,
            url: url.into(),
            created_at: Utc::now(),
        }
    }
}
