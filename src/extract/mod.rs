//! Structured-data extraction from listing pages.
//!
//! [`StructuredDataExtractor`] streams an HTML page through the `html5ever`
//! tokenizer until it finds the page's JSON-LD block and decodes it into a
//! [`crate::domain::ProductRecord`]. Extraction is a pure transformation of
//! the stream: no logging, no shared state.

mod scanner;
pub mod structured_data;

pub use structured_data::{
    DEFAULT_MAX_TOKEN_BYTES, JSON_LD_MEDIA_TYPE, StructuredDataExtractor, decode_payload,
};
