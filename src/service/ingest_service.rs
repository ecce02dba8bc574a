//! Ingestion service: tracks listings and appends snapshots.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::domain::{Listing, ListingId, PrincipalId, ProductRecord, SnapshotVersion};
use crate::error::TrackerError;
use crate::fetch::ProductSource;
use crate::persistence::SnapshotStore;

/// Result of a tracking request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackOutcome {
    /// The listing was created.
    Tracked(Listing),
    /// The principal already tracked the URL; nothing changed.
    AlreadyTracked,
}

/// Outcome of ingesting one listing during an [`IngestService::ingest_owner`]
/// pass.
#[derive(Debug)]
pub struct IngestReport {
    /// Listing that was ingested.
    pub listing: Listing,
    /// Version stored, or why nothing was stored.
    pub outcome: Result<SnapshotVersion, TrackerError>,
}

/// Orchestrates fetch, extraction and append for tracked listings.
///
/// Owns the retry policy for version conflicts; the store never retries on
/// its own.
#[derive(Debug, Clone)]
pub struct IngestService {
    store: Arc<dyn SnapshotStore>,
    source: Arc<dyn ProductSource>,
    max_append_attempts: u32,
}

impl IngestService {
    /// Creates a new `IngestService`. At least one append attempt is always
    /// made.
    #[must_use]
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        source: Arc<dyn ProductSource>,
        max_append_attempts: u32,
    ) -> Self {
        Self {
            store,
            source,
            max_append_attempts: max_append_attempts.max(1),
        }
    }

    /// Returns a reference to the inner store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    /// Starts tracking `url` for `owner`. Tracking an already tracked URL is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns a [`TrackerError`] if the principal does not exist or the
    /// store fails.
    pub async fn track(&self, owner: PrincipalId, url: &str) -> Result<TrackOutcome, TrackerError> {
        match self.store.track_listing(owner, url).await {
            Ok(listing) => {
                tracing::info!(listing = %listing.id, %owner, url, "listing tracked");
                Ok(TrackOutcome::Tracked(listing))
            }
            Err(e) if e.is_already_satisfied() => {
                tracing::debug!(%owner, url, "listing already tracked");
                Ok(TrackOutcome::AlreadyTracked)
            }
            Err(e) => Err(e),
        }
    }

    /// Appends `record` to `listing`, retrying version conflicts up to the
    /// configured number of attempts.
    ///
    /// # Errors
    ///
    /// Returns the last [`TrackerError::VersionConflict`] once attempts are
    /// exhausted, or any other store error immediately.
    pub async fn append_with_retry(
        &self,
        listing: ListingId,
        record: &ProductRecord,
        cancel: &CancellationToken,
    ) -> Result<SnapshotVersion, TrackerError> {
        let mut attempt = 1;
        loop {
            match self.store.append_snapshot(listing, record, cancel).await {
                Err(TrackerError::VersionConflict { version, .. })
                    if attempt < self.max_append_attempts =>
                {
                    tracing::debug!(%listing, %version, attempt, "version conflict, retrying append");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Fetches the listing page and stores a new snapshot of it.
    ///
    /// # Errors
    ///
    /// Returns the fetch, extraction or store error that stopped ingestion.
    /// Nothing is stored on error.
    pub async fn ingest_listing(
        &self,
        listing: &Listing,
        cancel: &CancellationToken,
    ) -> Result<SnapshotVersion, TrackerError> {
        let record = self.source.fetch_product(&listing.url, cancel).await?;
        let version = self.append_with_retry(listing.id, &record, cancel).await?;
        tracing::info!(
            listing = %listing.id,
            url = %listing.url,
            %version,
            price = %record.offers.price,
            currency = %record.offers.price_currency,
            availability = %record.offers.availability,
            "snapshot stored"
        );
        Ok(version)
    }

    /// Runs one ingestion pass over every listing `owner` tracks.
    ///
    /// A failing listing is reported and does not stop the pass. Once
    /// `cancel` fires, remaining listings are skipped.
    ///
    /// # Errors
    ///
    /// Returns a [`TrackerError`] only if the listings cannot be loaded.
    pub async fn ingest_owner(
        &self,
        owner: PrincipalId,
        cancel: &CancellationToken,
    ) -> Result<Vec<IngestReport>, TrackerError> {
        let listings = self.store.listings_for(owner).await?;
        tracing::info!(%owner, listings = listings.len(), "ingestion pass started");

        let mut reports = Vec::with_capacity(listings.len());
        for listing in listings {
            if cancel.is_cancelled() {
                tracing::warn!(%owner, "ingestion pass cancelled");
                break;
            }
            let outcome = self.ingest_listing(&listing, cancel).await;
            if let Err(e) = &outcome {
                if e.is_terminal() {
                    tracing::warn!(listing = %listing.id, url = %listing.url, code = e.error_code(), error = %e, "listing needs attention");
                } else {
                    tracing::error!(listing = %listing.id, url = %listing.url, code = e.error_code(), retryable = e.is_retryable(), error = %e, "ingestion failed");
                }
            }
            reports.push(IngestReport { listing, outcome });
        }
        Ok(reports)
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::indexing_slicing)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use reqwest::StatusCode;

    use super::*;
    use crate::domain::Availability;
    use crate::domain::credential::MIN_HASH_COST;
    use crate::extract::StructuredDataExtractor;
    use crate::fetch::{check_status, verify_url};
    use crate::persistence::{MemoryStore, PrincipalStore};

    const MOUSE_URL: &str = "https://www.olx.ro/d/oferta/mouse-IDkbEDA.html";

    /// Serves canned pages keyed by URL; unknown URLs answer 404.
    #[derive(Debug, Default)]
    struct StaticPages {
        pages: HashMap<String, (u16, String)>,
    }

    impl StaticPages {
        fn with_page(mut self, url: &str, status: u16, html: String) -> Self {
            self.pages.insert(url.to_string(), (status, html));
            self
        }
    }

    #[async_trait]
    impl ProductSource for StaticPages {
        async fn fetch_product(
            &self,
            url: &str,
            cancel: &CancellationToken,
        ) -> Result<ProductRecord, TrackerError> {
            let (status, html) = self
                .pages
                .get(url)
                .cloned()
                .unwrap_or((404, String::new()));
            let Ok(status) = StatusCode::from_u16(status) else {
                panic!("invalid status {status}");
            };
            check_status(url, status)?;
            let record = StructuredDataExtractor::new()
                .extract(html.as_bytes(), cancel)
                .await?;
            verify_url(url, &record)?;
            Ok(record)
        }
    }

    fn product_page(url: &str, price: &str) -> String {
        format!(
            r#"<!DOCTYPE html><html><head><title>Mouse</title>
<script type="application/ld+json">{{"@context":"https://schema.org","@type":"Product","name":"Mouse","url":"{url}","description":"wireless","offers":{{"@type":"Offer","price":{price},"priceCurrency":"RON","availability":"https://schema.org/InStock"}}}}</script>
</head><body></body></html>"#
        )
    }

    async fn setup(source: StaticPages, attempts: u32) -> (Arc<MemoryStore>, IngestService, PrincipalId) {
        let store = Arc::new(MemoryStore::new().with_hash_cost(MIN_HASH_COST));
        let Ok(owner) = store.create_principal("alice", "secret").await else {
            panic!("create principal failed");
        };
        let service = IngestService::new(
            Arc::clone(&store) as Arc<dyn SnapshotStore>,
            Arc::new(source),
            attempts,
        );
        (store, service, owner)
    }

    async fn tracked(service: &IngestService, owner: PrincipalId, url: &str) -> Listing {
        let Ok(TrackOutcome::Tracked(listing)) = service.track(owner, url).await else {
            panic!("track failed");
        };
        listing
    }

    #[tokio::test]
    async fn ingests_listing_end_to_end() {
        let source = StaticPages::default().with_page(MOUSE_URL, 200, product_page(MOUSE_URL, "49.99"));
        let (store, service, owner) = setup(source, 3).await;
        let listing = tracked(&service, owner, MOUSE_URL).await;

        let result = service.ingest_listing(&listing, &CancellationToken::new()).await;
        let Ok(version) = result else {
            panic!("ingest failed: {result:?}");
        };
        assert_eq!(version, SnapshotVersion::FIRST);

        let Ok(history) = store.snapshots_for(listing.id).await else {
            panic!("history failed");
        };
        assert_eq!(history.len(), 1);
        let snapshot = &history[0];
        assert_eq!(snapshot.name, "Mouse");
        assert_eq!(snapshot.description, "wireless");
        assert_eq!(snapshot.price_minor_units, 4999);
        assert_eq!(snapshot.currency, "RON");
        assert_eq!(snapshot.availability, Availability::InStock);
        assert_eq!(snapshot.raw_payload["url"], MOUSE_URL);
    }

    #[tokio::test]
    async fn repeated_ingestion_appends_sequential_versions() {
        let source = StaticPages::default().with_page(MOUSE_URL, 200, product_page(MOUSE_URL, "10"));
        let (store, service, owner) = setup(source, 3).await;
        let listing = tracked(&service, owner, MOUSE_URL).await;
        let cancel = CancellationToken::new();

        for expected in 1..=4 {
            let Ok(version) = service.ingest_listing(&listing, &cancel).await else {
                panic!("ingest {expected} failed");
            };
            assert_eq!(version.get(), expected);
        }
        let Ok(history) = store.snapshots_for(listing.id).await else {
            panic!("history failed");
        };
        assert_eq!(history.len(), 4);
        // Same observed price, byte-identical minor units.
        assert!(history.iter().all(|s| s.price_minor_units == 1000));
    }

    #[tokio::test]
    async fn tracking_twice_is_success() {
        let (store, service, owner) = setup(StaticPages::default(), 3).await;
        let _ = tracked(&service, owner, MOUSE_URL).await;
        let second = service.track(owner, MOUSE_URL).await;
        assert!(matches!(second, Ok(TrackOutcome::AlreadyTracked)));
        let Ok(listings) = store.listings_for(owner).await else {
            panic!("list failed");
        };
        assert_eq!(listings.len(), 1);
    }

    #[tokio::test]
    async fn tracking_for_unknown_principal_fails() {
        let (_, service, _) = setup(StaticPages::default(), 3).await;
        let result = service.track(PrincipalId::new(), MOUSE_URL).await;
        assert!(matches!(result, Err(TrackerError::PrincipalNotFound(_))));
    }

    #[tokio::test]
    async fn concurrent_appends_succeed_with_enough_attempts() {
        const WRITERS: u32 = 6;
        let source = StaticPages::default().with_page(MOUSE_URL, 200, product_page(MOUSE_URL, "5"));
        let (store, service, owner) = setup(source, WRITERS).await;
        let listing = tracked(&service, owner, MOUSE_URL).await;

        let mut handles = Vec::new();
        for _ in 0..WRITERS {
            let service = service.clone();
            let listing = listing.clone();
            handles.push(tokio::spawn(async move {
                service.ingest_listing(&listing, &CancellationToken::new()).await
            }));
        }
        let mut versions = Vec::new();
        for handle in handles {
            let Ok(Ok(version)) = handle.await else {
                panic!("writer failed");
            };
            versions.push(version.get());
        }
        versions.sort_unstable();
        assert_eq!(versions, vec![1, 2, 3, 4, 5, 6]);

        let Ok(history) = store.snapshots_for(listing.id).await else {
            panic!("history failed");
        };
        assert_eq!(history.len(), 6);
    }

    #[tokio::test]
    async fn single_attempt_surfaces_conflict() {
        let source = StaticPages::default();
        let (_, service, owner) = setup(source, 1).await;
        let listing = tracked(&service, owner, MOUSE_URL).await;
        let Ok(record) = crate::extract::decode_payload(&format!(
            r#"{{"name":"Mouse","url":"{MOUSE_URL}","offers":{{"price":1}}}}"#
        )) else {
            panic!("decode failed");
        };
        let cancel = CancellationToken::new();
        let (a, b) = tokio::join!(
            service.append_with_retry(listing.id, &record, &cancel),
            service.append_with_retry(listing.id, &record, &cancel),
        );
        let conflicts = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(TrackerError::VersionConflict { .. })))
            .count();
        assert_eq!(conflicts, 1, "results: {a:?} {b:?}");
    }

    #[tokio::test]
    async fn ingest_owner_continues_past_failures() {
        let gone = "https://www.olx.ro/d/oferta/gone-ID1.html";
        let moved = "https://www.olx.ro/d/oferta/moved-ID2.html";
        let broken = "https://www.olx.ro/d/oferta/broken-ID3.html";
        let source = StaticPages::default()
            .with_page(MOUSE_URL, 200, product_page(MOUSE_URL, "49.99"))
            .with_page(gone, 410, String::new())
            .with_page(moved, 200, product_page("https://www.olx.ro/d/oferta/other.html", "1"))
            .with_page(
                broken,
                200,
                r#"<script type="application/ld+json">{"name":</script>"#.to_string(),
            );
        let (store, service, owner) = setup(source, 3).await;
        for url in [MOUSE_URL, gone, moved, broken] {
            let _ = tracked(&service, owner, url).await;
        }

        let Ok(reports) = service.ingest_owner(owner, &CancellationToken::new()).await else {
            panic!("pass failed");
        };
        assert_eq!(reports.len(), 4);

        let outcome_for = |url: &str| {
            reports
                .iter()
                .find(|r| r.listing.url == url)
                .map(|r| &r.outcome)
        };
        assert!(matches!(outcome_for(MOUSE_URL), Some(Ok(v)) if *v == SnapshotVersion::FIRST));
        assert!(matches!(outcome_for(gone), Some(Err(TrackerError::ListingDeactivated { .. }))));
        assert!(matches!(outcome_for(moved), Some(Err(TrackerError::UrlMismatch { .. }))));
        assert!(matches!(
            outcome_for(broken),
            Some(Err(TrackerError::MalformedStructuredData(_)))
        ));

        for report in &reports {
            let Ok(history) = store.snapshots_for(report.listing.id).await else {
                panic!("history failed");
            };
            assert_eq!(history.len(), usize::from(report.outcome.is_ok()));
        }
    }

    #[tokio::test]
    async fn cancelled_pass_stores_nothing() {
        let source = StaticPages::default().with_page(MOUSE_URL, 200, product_page(MOUSE_URL, "1"));
        let (store, service, owner) = setup(source, 3).await;
        let listing = tracked(&service, owner, MOUSE_URL).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let Ok(reports) = service.ingest_owner(owner, &cancel).await else {
            panic!("pass failed");
        };
        assert!(reports.is_empty());
        let Ok(history) = store.snapshots_for(listing.id).await else {
            panic!("history failed");
        };
        assert!(history.is_empty());
    }
}
