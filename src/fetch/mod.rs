//! Fetch boundary: HTTP status gating, body streaming, URL post-condition.
//!
//! Only `200 OK` responses reach the extractor. `410 Gone` means the
//! listing was deactivated; any other status is rejected before the body is
//! read. The HTTP client is built explicitly by the caller and handed to
//! [`ListingFetcher`].

use std::fmt;
use std::io;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::StatusCode;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use crate::config::TrackerConfig;
use crate::domain::ProductRecord;
use crate::error::TrackerError;
use crate::extract::StructuredDataExtractor;

/// Source of product records for listing URLs.
#[async_trait]
pub trait ProductSource: fmt::Debug + Send + Sync {
    /// Fetches `url` and returns the product record it describes.
    ///
    /// # Errors
    ///
    /// Returns the fetch-boundary and extraction conditions of
    /// [`TrackerError`], including [`TrackerError::ListingDeactivated`] and
    /// [`TrackerError::UrlMismatch`].
    async fn fetch_product(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<ProductRecord, TrackerError>;
}

/// Builds the HTTP client used for listing pages.
///
/// # Errors
///
/// Returns [`TrackerError::Configuration`] if the client cannot be built
/// (for example, an invalid user agent).
pub fn build_http_client(config: &TrackerConfig) -> Result<reqwest::Client, TrackerError> {
    reqwest::Client::builder()
        .timeout(config.http_timeout())
        .user_agent(config.http_user_agent.as_str())
        .build()
        .map_err(|e| TrackerError::Configuration(format!("http client: {e}")))
}

/// Maps a response status onto the fetch-boundary conditions.
///
/// # Errors
///
/// Returns [`TrackerError::ListingDeactivated`] for `410 Gone` and
/// [`TrackerError::UnexpectedStatus`] for anything other than `200 OK`.
pub fn check_status(url: &str, status: StatusCode) -> Result<(), TrackerError> {
    match status {
        StatusCode::OK => Ok(()),
        StatusCode::GONE => Err(TrackerError::ListingDeactivated {
            url: url.to_string(),
        }),
        other => Err(TrackerError::UnexpectedStatus {
            url: url.to_string(),
            status: other.as_u16(),
        }),
    }
}

/// Checks that the page described the URL that was requested.
///
/// # Errors
///
/// Returns [`TrackerError::UrlMismatch`] if the record's URL differs from
/// `requested` (the page served unrelated or cached content).
pub fn verify_url(requested: &str, record: &ProductRecord) -> Result<(), TrackerError> {
    if record.url == requested {
        Ok(())
    } else {
        Err(TrackerError::UrlMismatch {
            requested: requested.to_string(),
            served: record.url.clone(),
        })
    }
}

/// Fetches listing pages over HTTP and extracts their product records.
#[derive(Debug, Clone)]
pub struct ListingFetcher {
    client: reqwest::Client,
    extractor: StructuredDataExtractor,
}

impl ListingFetcher {
    /// Creates a fetcher from an explicitly constructed client.
    #[must_use]
    pub fn new(client: reqwest::Client, extractor: StructuredDataExtractor) -> Self {
        Self { client, extractor }
    }
}

#[async_trait]
impl ProductSource for ListingFetcher {
    async fn fetch_product(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<ProductRecord, TrackerError> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TrackerError::Cancelled),
            response = self.client.get(url).send() => response,
        };
        let response = response.map_err(|e| TrackerError::Transport(e.to_string()))?;
        check_status(url, response.status())?;

        let body = StreamReader::new(Box::pin(
            response.bytes_stream().map_err(body_error),
        ));
        let record = self.extractor.extract(body, cancel).await?;
        verify_url(url, &record)?;
        Ok(record)
    }
}

/// A body read cut off by the client timeout becomes `TimedOut`, which the
/// extractor treats as the end of the page.
fn body_error(e: reqwest::Error) -> io::Error {
    let kind = if e.is_timeout() {
        io::ErrorKind::TimedOut
    } else {
        io::ErrorKind::Other
    };
    io::Error::new(kind, e)
}
