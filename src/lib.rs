//! # fragstore - versioned document fragments over a relational store
//!
//! Documents are persisted as path-addressed, timestamp-versioned fragments
//! and served back through demand-driven streams. An auxiliary vertex/edge
//! graph keeps cross-document references consistent.
//!
//! fragstore provides:
//! - An index-unaware path codec for array-bearing document paths
//! - A batched, snapshot-consistent fragment store with bitemporal reads
//! - A backpressure protocol that turns blocking cursors into pull streams
//! - A graph link store that reconciles a document's outgoing links
//! - Scoped transactions that always release their session exactly once

pub mod codec;
pub mod fragment;
pub mod range;
pub mod document;
pub mod stream;
pub mod storage;
pub mod graph;
pub mod persistence;
pub mod config;
pub mod logging;
pub mod ui;

// Re-exports for convenient access
pub use fragment::{DocumentKey, Fragment, FragmentType};
pub use range::Range;
pub use stream::{Publisher, Subscriber, Subscription};
pub use storage::{ConnectionSource, FragmentStore, SchemaBootstrap, SqliteSource, Transaction};
pub use graph::{Edge, EdgePrimaryKey, GraphStore, OutgoingLink, UpsertOutcome, Vertex, VertexPrimaryKey};
pub use persistence::DocumentPersistence;
pub use config::{FragstoreConfig, StoreOptions, Strategy};

/// Result type alias for fragstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for fragstore operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caller broke an input contract; never retried
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Encoding mismatch: `{path}` has {markers} index markers but {indices} indices")]
    EncodingMismatch {
        path: String,
        markers: usize,
        indices: usize,
    },

    /// Any failure surfaced by the backing store
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session unavailable: {0}")]
    SessionUnavailable(String),
}

impl Error {
    /// Programming errors upstream: bad offsets, asymmetric path encodings
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Error::ContractViolation(_) | Error::EncodingMismatch { .. })
    }

    /// Failures raised by the relational engine
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, Error::Storage(_))
    }
}
