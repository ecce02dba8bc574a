//! listing-tracker entry point.
//!
//! Tracks every URL given on the command line for the configured principal,
//! then runs one ingestion pass over all of that principal's listings.
//! Ctrl-C cancels the pass; nothing partial is stored.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use listing_tracker::config::TrackerConfig;
use listing_tracker::domain::PrincipalId;
use listing_tracker::error::TrackerError;
use listing_tracker::extract::StructuredDataExtractor;
use listing_tracker::fetch::{ListingFetcher, build_http_client};
use listing_tracker::persistence::{PgStore, PrincipalStore, SnapshotStore};
use listing_tracker::service::{IngestService, TrackOutcome};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = TrackerConfig::from_env().context("loading configuration")?;
    init_tracing(config.log_json);
    tracing::info!(user_agent = %config.http_user_agent, "starting listing-tracker");

    // Build persistence layer
    let store = Arc::new(
        PgStore::connect(&config)
            .await
            .context("connecting to the database")?,
    );
    if config.run_migrations {
        store.migrate().await.context("applying migrations")?;
    }
    let owner = resolve_principal(store.as_ref(), &config).await?;

    // Build fetch and service layers
    let client = build_http_client(&config)?;
    let fetcher = ListingFetcher::new(client, StructuredDataExtractor::from_config(&config));
    let service = IngestService::new(
        Arc::clone(&store) as Arc<dyn SnapshotStore>,
        Arc::new(fetcher),
        config.append_max_attempts,
    );

    for url in std::env::args().skip(1) {
        if let TrackOutcome::Tracked(listing) = service.track(owner, &url).await? {
            tracing::debug!(listing = %listing.id, "new listing");
        }
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling ingestion");
            shutdown.cancel();
        }
    });

    let reports = service.ingest_owner(owner, &cancel).await?;
    let stored = reports.iter().filter(|r| r.outcome.is_ok()).count();
    tracing::info!(
        %owner,
        stored,
        failed = reports.len().saturating_sub(stored),
        "ingestion pass finished"
    );

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Authenticates the configured principal, registering it on first run.
async fn resolve_principal(
    store: &dyn PrincipalStore,
    config: &TrackerConfig,
) -> anyhow::Result<PrincipalId> {
    match store.authenticate(&config.username, &config.password).await {
        Ok(id) => Ok(id),
        Err(TrackerError::InvalidCredentials) => store
            .create_principal(&config.username, &config.password)
            .await
            .with_context(|| format!("registering principal {}", config.username)),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use listing_tracker::domain::credential::MIN_HASH_COST;
    use listing_tracker::persistence::MemoryStore;

    use super::*;

    #[tokio::test]
    async fn principal_is_registered_then_reused() {
        let store = MemoryStore::new().with_hash_cost(MIN_HASH_COST);
        let config = TrackerConfig {
            username: "operator".to_string(),
            password: "secret".to_string(),
            ..TrackerConfig::default()
        };
        let Ok(first) = resolve_principal(&store, &config).await else {
            panic!("registration failed");
        };
        let Ok(second) = resolve_principal(&store, &config).await else {
            panic!("authentication failed");
        };
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn wrong_password_for_existing_principal_fails() {
        let store = MemoryStore::new().with_hash_cost(MIN_HASH_COST);
        let Ok(_) = store.create_principal("operator", "secret").await else {
            panic!("registration failed");
        };
        let config = TrackerConfig {
            username: "operator".to_string(),
            password: "other".to_string(),
            ..TrackerConfig::default()
        };
        let Err(err) = resolve_principal(&store, &config).await else {
            panic!("wrong password accepted");
        };
        assert!(matches!(
            err.downcast_ref::<TrackerError>(),
            Some(TrackerError::PrincipalExists(_))
        ));
    }
}
