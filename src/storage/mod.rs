//! Storage Layer - SQLite-backed persistence
//!
//! System of record is SQLite with tables:
//! - fragment(namespace, entity, id, version, path, indices, type, value)
//! - vertex(namespace, entity, id, valid, uri, data)
//! - edge(vertex_to_*, vertex_from_relationship_uri, vertex_from_label, vertex_from_*)

pub mod schema;
pub mod source;
pub mod transaction;
pub mod fragments;

pub use source::{ConnectionSource, SchemaBootstrap, SqliteSource};
pub use transaction::{Transaction, TransactionStatistics};
pub use fragments::{FragmentStore, FragmentStream};
