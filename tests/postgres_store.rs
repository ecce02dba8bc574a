//! `PgStore` integration tests.
//!
//! Run only when `TEST_DATABASE_URL` points at a disposable PostgreSQL
//! database; otherwise every test returns immediately.

#![allow(clippy::panic, clippy::indexing_slicing)]

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use listing_tracker::config::TrackerConfig;
use listing_tracker::domain::{Availability, ListingId, PrincipalId, ProductRecord};
use listing_tracker::error::TrackerError;
use listing_tracker::persistence::{PgStore, PrincipalStore, SnapshotStore};

const URL: &str = "https://www.olx.ro/d/oferta/mouse-IDkbEDA.html";

async fn store() -> Option<Arc<PgStore>> {
    let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
    let config = TrackerConfig {
        database_url,
        database_min_connections: 0,
        password_hash_cost: 4,
        ..TrackerConfig::default()
    };
    let Ok(store) = PgStore::connect(&config).await else {
        panic!("cannot connect to TEST_DATABASE_URL");
    };
    if let Err(e) = store.migrate().await {
        panic!("migrations failed: {e}");
    }
    Some(Arc::new(store))
}

async fn principal(store: &PgStore) -> PrincipalId {
    let username = format!("it-{}", uuid::Uuid::new_v4().simple());
    let Ok(id) = store.create_principal(&username, "secret").await else {
        panic!("create principal failed");
    };
    id
}

fn record(price: f64) -> ProductRecord {
    let Ok(record) = ProductRecord::from_payload(json!({
        "@type": "Product",
        "name": "Mouse",
        "url": URL,
        "offers": {"price": price, "priceCurrency": "RON", "availability": "InStock"}
    })) else {
        panic!("record decode failed");
    };
    record
}

#[tokio::test]
async fn append_and_read_back() {
    let Some(store) = store().await else { return };
    let owner = principal(&store).await;
    let Ok(listing) = store.track_listing(owner, URL).await else {
        panic!("track failed");
    };
    let cancel = CancellationToken::new();

    for expected in 1..=3 {
        let result = store.append_snapshot(listing.id, &record(49.99), &cancel).await;
        let Ok(version) = result else {
            panic!("append failed: {result:?}");
        };
        assert_eq!(version.get(), expected);
    }

    let Ok(history) = store.snapshots_for(listing.id).await else {
        panic!("history failed");
    };
    let versions: Vec<i32> = history.iter().map(|s| s.version.get()).collect();
    assert_eq!(versions, vec![3, 2, 1]);
    assert_eq!(history[0].price_minor_units, 4999);
    assert_eq!(history[0].availability, Availability::InStock);
    assert_eq!(history[0].raw_payload["name"], "Mouse");
}

#[tokio::test]
async fn concurrent_writers_get_gapless_versions() {
    const WRITERS: usize = 8;
    let Some(store) = store().await else { return };
    let owner = principal(&store).await;
    let Ok(listing) = store.track_listing(owner, URL).await else {
        panic!("track failed");
    };

    let mut handles = Vec::with_capacity(WRITERS);
    for _ in 0..WRITERS {
        let store = Arc::clone(&store);
        let id = listing.id;
        handles.push(tokio::spawn(async move {
            let cancel = CancellationToken::new();
            loop {
                match store.append_snapshot(id, &record(1.0), &cancel).await {
                    Ok(version) => return version,
                    Err(TrackerError::VersionConflict { .. }) => {}
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
        }));
    }

    let mut versions = Vec::with_capacity(WRITERS);
    for handle in handles {
        let Ok(version) = handle.await else {
            panic!("writer panicked");
        };
        versions.push(version.get());
    }
    versions.sort_unstable();
    let expected: Vec<i32> = (1..=8).collect();
    assert_eq!(versions, expected);
}

#[tokio::test]
async fn constraint_violations_are_typed() {
    let Some(store) = store().await else { return };
    let owner = principal(&store).await;
    let Ok(_) = store.track_listing(owner, URL).await else {
        panic!("track failed");
    };

    assert!(matches!(
        store.track_listing(owner, URL).await,
        Err(TrackerError::AlreadyTracked { .. })
    ));
    assert!(matches!(
        store.track_listing(PrincipalId::new(), URL).await,
        Err(TrackerError::PrincipalNotFound(_))
    ));
    assert!(matches!(
        store
            .append_snapshot(ListingId::new(), &record(1.0), &CancellationToken::new())
            .await,
        Err(TrackerError::ListingNotFound(_))
    ));
}

#[tokio::test]
async fn listings_are_newest_first() {
    let Some(store) = store().await else { return };
    let owner = principal(&store).await;
    let urls = [
        "https://www.olx.ro/d/oferta/a.html",
        "https://www.olx.ro/d/oferta/b.html",
    ];
    for url in urls {
        let Ok(_) = store.track_listing(owner, url).await else {
            panic!("track failed");
        };
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    let Ok(listings) = store.listings_for(owner).await else {
        panic!("list failed");
    };
    let found: Vec<&str> = listings.iter().map(|l| l.url.as_str()).collect();
    assert_eq!(found, vec![urls[1], urls[0]]);
}

#[tokio::test]
async fn principal_credentials() {
    let Some(store) = store().await else { return };
    let username = format!("it-{}", uuid::Uuid::new_v4().simple());
    let Ok(id) = store.create_principal(&username, "secret").await else {
        panic!("create principal failed");
    };
    assert!(matches!(store.authenticate(&username, "secret").await, Ok(found) if found == id));
    assert!(matches!(
        store.authenticate(&username, "wrong").await,
        Err(TrackerError::InvalidCredentials)
    ));
    assert!(matches!(
        store.create_principal(&username, "again").await,
        Err(TrackerError::PrincipalExists(_))
    ));
}

#[tokio::test]
async fn cancelled_append_writes_nothing() {
    let Some(store) = store().await else { return };
    let owner = principal(&store).await;
    let Ok(listing) = store.track_listing(owner, URL).await else {
        panic!("track failed");
    };
    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(matches!(
        store.append_snapshot(listing.id, &record(1.0), &cancel).await,
        Err(TrackerError::Cancelled)
    ));
    let Ok(history) = store.snapshots_for(listing.id).await else {
        panic!("history failed");
    };
    assert!(history.is_empty());
}
