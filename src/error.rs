//! Tracker error types with a numeric code and retry classification.
//!
//! [`TrackerError`] is the single error type returned by the extractor, the
//! fetch boundary, the stores, and the ingestion service. Every failure is
//! returned as a typed condition; nothing is logged and swallowed below the
//! service layer, and nothing is retried internally.

use rust_decimal::Decimal;

use crate::domain::{ListingId, PrincipalId, SnapshotVersion};

/// Tracker error enum.
///
/// # Error Code Ranges
///
/// | Range     | Category                  |
/// |-----------|---------------------------|
/// | 1000–1999 | Extraction                |
/// | 2000–2999 | Fetch boundary            |
/// | 3000–3999 | Store / business outcomes |
/// | 4000–4999 | Principals                |
/// | 5000–5999 | Infrastructure            |
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// The page was read to the end without finding a structured-data block.
    #[error("structured data not found")]
    StructuredDataNotFound,

    /// A structured-data block was found but could not be decoded.
    #[error("malformed structured data: {0}")]
    MalformedStructuredData(#[source] serde_json::Error),

    /// The listing page answered `410 Gone`.
    #[error("listing deactivated: {url}")]
    ListingDeactivated {
        /// Requested URL.
        url: String,
    },

    /// The listing page answered with a status other than 200 or 410.
    #[error("unexpected status {status} for {url}")]
    UnexpectedStatus {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The HTTP request failed before a response was received.
    #[error("transport error: {0}")]
    Transport(String),

    /// Reading the response body failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The page described a different URL than the one requested.
    #[error("url mismatch: requested {requested}, page describes {served}")]
    UrlMismatch {
        /// Requested URL.
        requested: String,
        /// URL found in the structured data.
        served: String,
    },

    /// The principal already tracks this URL.
    #[error("principal {owner} already tracks {url}")]
    AlreadyTracked {
        /// Owning principal.
        owner: PrincipalId,
        /// Tracked URL.
        url: String,
    },

    /// A concurrent writer claimed the computed version first.
    #[error("version conflict on listing {listing} at {version}")]
    VersionConflict {
        /// Listing being appended to.
        listing: ListingId,
        /// Version that was already taken.
        version: SnapshotVersion,
    },

    /// No listing with the given ID exists.
    #[error("listing not found: {0}")]
    ListingNotFound(ListingId),

    /// No principal with the given ID exists.
    #[error("principal not found: {0}")]
    PrincipalNotFound(PrincipalId),

    /// A principal with this username already exists.
    #[error("principal already exists: {0}")]
    PrincipalExists(String),

    /// Unknown username or wrong password.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The price cannot be represented in integer minor units.
    #[error("price out of range: {0}")]
    PriceOutOfRange(Decimal),

    /// Persistence layer failure.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// The operation was cancelled before it completed; nothing was stored.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TrackerError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::StructuredDataNotFound => 1001,
            Self::MalformedStructuredData(_) => 1002,
            Self::ListingDeactivated { .. } => 2001,
            Self::UnexpectedStatus { .. } => 2002,
            Self::Transport(_) => 2003,
            Self::Io(_) => 2004,
            Self::UrlMismatch { .. } => 2005,
            Self::AlreadyTracked { .. } => 3001,
            Self::VersionConflict { .. } => 3002,
            Self::ListingNotFound(_) => 3003,
            Self::PriceOutOfRange(_) => 3004,
            Self::PrincipalNotFound(_) => 4001,
            Self::PrincipalExists(_) => 4002,
            Self::InvalidCredentials => 4003,
            Self::PersistenceError(_) => 5001,
            Self::Cancelled => 5002,
            Self::Configuration(_) => 5003,
            Self::Internal(_) => 5000,
        }
    }

    /// Returns `true` if repeating the whole operation may succeed.
    ///
    /// Retry policy itself belongs to the caller.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::VersionConflict { .. } | Self::Transport(_) | Self::Io(_) => true,
            Self::UnexpectedStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if the listing should stop being polled or be flagged
    /// for attention rather than retried.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ListingDeactivated { .. } | Self::UrlMismatch { .. }
        )
    }

    /// Returns `true` for outcomes callers treat as success (the requested
    /// state already holds).
    #[must_use]
    pub const fn is_already_satisfied(&self) -> bool {
        matches!(self, Self::AlreadyTracked { .. })
    }
}
