//! Password credentials for principals.
//!
//! Stored as a bcrypt hash string (`$2b$<cost>$<salt+digest>`). Hashing is
//! CPU-bound; the `*_task` helpers run it on the blocking thread pool.

use crate::error::TrackerError;

/// Lowest cost bcrypt accepts.
pub const MIN_HASH_COST: u32 = 4;
/// Highest cost bcrypt accepts.
pub const MAX_HASH_COST: u32 = 31;
/// Cost used when none is configured.
pub const DEFAULT_HASH_COST: u32 = bcrypt::DEFAULT_COST;

/// Derives the stored credential for `password` with a fresh random salt.
///
/// # Errors
///
/// Returns [`TrackerError::Internal`] if `cost` is outside
/// [`MIN_HASH_COST`]`..=`[`MAX_HASH_COST`].
pub fn hash_password(password: &str, cost: u32) -> Result<String, TrackerError> {
    bcrypt::hash(password, cost)
        .map_err(|e| TrackerError::Internal(format!("password hashing failed: {e}")))
}

/// Returns `true` if `password` matches the stored credential.
///
/// Malformed stored credentials never match.
#[must_use]
pub fn verify_password(stored: &str, password: &str) -> bool {
    bcrypt::verify(password, stored).unwrap_or(false)
}

/// [`hash_password`] on the blocking thread pool.
///
/// # Errors
///
/// As [`hash_password`], or [`TrackerError::Internal`] if the task panics.
pub async fn hash_password_task(password: &str, cost: u32) -> Result<String, TrackerError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hash_password(&password, cost))
        .await
        .map_err(|e| TrackerError::Internal(format!("password hashing task failed: {e}")))?
}

/// [`verify_password`] on the blocking thread pool. A failed task never
/// matches.
pub async fn verify_password_task(stored: String, password: &str) -> bool {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || verify_password(&stored, &password))
        .await
        .unwrap_or(false)
}
