//! # listing-tracker
//!
//! Tracks marketplace listings and keeps a versioned history of what each
//! listing page advertised.
//!
//! A listing page is streamed through the `html5ever` tokenizer until the
//! embedded JSON-LD product block is found; the decoded record is appended
//! to the listing's history under the next version number. Versions are assigned
//! atomically per listing, so concurrent writers either get consecutive
//! versions or a typed conflict.
//!
//! ## Architecture
//!
//! ```text
//! listing-tracker (bin)
//!     │
//!     ├── IngestService (service/)
//!     │
//!     ├── ListingFetcher (fetch/) ── reqwest
//!     │       └── StructuredDataExtractor (extract/) ── html5ever
//!     │
//!     └── SnapshotStore / PrincipalStore (persistence/)
//!             ├── PgStore ── PostgreSQL
//!             └── MemoryStore
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod persistence;
pub mod service;
