//! Locates and decodes the JSON-LD product block of a listing page.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::scanner::BlockScanner;
use crate::config::TrackerConfig;
use crate::domain::ProductRecord;
use crate::error::TrackerError;

/// Media type of embedded JSON-LD blocks.
pub const JSON_LD_MEDIA_TYPE: &str = "application/ld+json";

/// Default upper bound on the bytes buffered for a single token.
pub const DEFAULT_MAX_TOKEN_BYTES: usize = 8 * 1024 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// Chunks in flight between the reader and the scanner.
const FEED_DEPTH: usize = 4;

/// Extracts a [`ProductRecord`] from an HTML byte stream.
///
/// Scans tokens until the first `<script>` whose `type` is the configured
/// media type and decodes its text. Holds no state between calls.
#[derive(Debug, Clone)]
pub struct StructuredDataExtractor {
    media_type: String,
    max_token_bytes: usize,
}

impl Default for StructuredDataExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl StructuredDataExtractor {
    /// Creates an extractor for `application/ld+json` blocks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            media_type: JSON_LD_MEDIA_TYPE.to_string(),
            max_token_bytes: DEFAULT_MAX_TOKEN_BYTES,
        }
    }

    /// Creates an extractor from the tracker configuration.
    #[must_use]
    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new()
            .with_media_type(&config.extract_media_type)
            .with_max_token_bytes(config.extract_max_token_bytes)
    }

    /// Overrides the script media type to look for.
    #[must_use]
    pub fn with_media_type(mut self, media_type: &str) -> Self {
        self.media_type = media_type.trim().to_string();
        self
    }

    /// Overrides the per-token buffering bound.
    #[must_use]
    pub fn with_max_token_bytes(mut self, max_token_bytes: usize) -> Self {
        self.max_token_bytes = max_token_bytes;
        self
    }

    /// Extracts the product record from `source`.
    ///
    /// If `cancel` fires before a block is found, the stream is treated as
    /// exhausted.
    ///
    /// # Errors
    ///
    /// - [`TrackerError::StructuredDataNotFound`] if the stream ends (or is
    ///   cancelled) without a matching block.
    /// - [`TrackerError::MalformedStructuredData`] if the first matching
    ///   block is not a JSON object of the product schema.
    /// - [`TrackerError::Io`] if reading the stream fails.
    pub async fn extract<R>(
        &self,
        source: R,
        cancel: &CancellationToken,
    ) -> Result<ProductRecord, TrackerError>
    where
        R: AsyncRead + Unpin,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TrackerError::StructuredDataNotFound),
            result = self.scan(source) => result,
        }
    }

    async fn scan<R>(&self, mut source: R) -> Result<ProductRecord, TrackerError>
    where
        R: AsyncRead + Unpin,
    {
        let (chunks, feed) = mpsc::channel(FEED_DEPTH);
        let scanner = BlockScanner::new(&self.media_type, self.max_token_bytes);
        let mut scanning = tokio::task::spawn_blocking(move || scanner.run(feed));

        let pumping = pump(&mut source, chunks);
        tokio::pin!(pumping);
        // Once the scanner decides, the rest of the stream is never read.
        let pumped = tokio::select! {
            found = &mut scanning => return joined(found),
            pumped = &mut pumping => pumped,
        };
        match (joined(scanning.await), pumped) {
            (Err(TrackerError::StructuredDataNotFound), Err(e)) => Err(e),
            (found, _) => found,
        }
    }
}

fn joined(
    found: Result<Result<ProductRecord, TrackerError>, tokio::task::JoinError>,
) -> Result<ProductRecord, TrackerError> {
    found.map_err(|e| TrackerError::Internal(format!("html scanner failed: {e}")))?
}

/// Forwards `source` to the scanner in chunks, then sends the empty end
/// marker. A read error drops `chunks` without the marker.
///
/// A read that times out ends the stream like EOF.
async fn pump<R>(source: &mut R, chunks: mpsc::Sender<Vec<u8>>) -> Result<(), TrackerError>
where
    R: AsyncRead + Unpin,
{
    loop {
        let mut chunk = Vec::with_capacity(READ_CHUNK);
        match source.read_buf(&mut chunk).await {
            Ok(0) => break,
            Ok(_) => {
                if chunks.send(chunk).await.is_err() {
                    return Ok(());
                }
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
            Err(e) => return Err(TrackerError::Io(e)),
        }
    }
    // The scanner may already have decided.
    let _ = chunks.send(Vec::new()).await;
    Ok(())
}

/// Decodes a JSON-LD payload into a [`ProductRecord`].
///
/// # Errors
///
/// Returns [`TrackerError::MalformedStructuredData`] if `payload` is not
/// valid JSON or does not fit the product schema.
pub fn decode_payload(payload: &str) -> Result<ProductRecord, TrackerError> {
    let document: serde_json::Value =
        serde_json::from_str(payload).map_err(TrackerError::MalformedStructuredData)?;
    ProductRecord::from_payload(document).map_err(TrackerError::MalformedStructuredData)
}
