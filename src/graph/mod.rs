//! Graph Link Store - documents as vertices, references as edges
//!
//! Every document is a vertex row holding its JSON. Links a document
//! declares become edges keyed by target and relationship URI. A link to a
//! document that does not exist yet gets an invalid placeholder vertex so
//! the edge's foreign keys hold; writing the real document later turns the
//! placeholder valid in place.

pub mod model;
pub mod repository;
pub mod store;

pub use model::{Edge, EdgePrimaryKey, OutgoingLink, UpsertOutcome, Vertex, VertexPrimaryKey};
pub use repository::{EdgeRepository, Repository, VertexRepository};
pub use store::{GraphStore, LinkMerge};
