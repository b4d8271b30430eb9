//! Vertex and edge records

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of an entity instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VertexPrimaryKey {
    pub namespace: String,
    pub entity: String,
    pub id: String,
}

impl VertexPrimaryKey {
    pub fn new(namespace: impl Into<String>, entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// `/{namespace}/{entity}/{id}`
    pub fn uri(&self) -> String {
        format!("/{}/{}/{}", self.namespace, self.entity, self.id)
    }
}

impl fmt::Display for VertexPrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri())
    }
}

/// An entity instance, or a placeholder standing in for one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vertex {
    pub key: VertexPrimaryKey,
    /// False for placeholders created only to satisfy an edge
    pub valid: bool,
    /// Serialized JSON document; absent for placeholders
    pub data: Option<String>,
}

impl Vertex {
    pub fn new(key: VertexPrimaryKey, valid: bool, data: Option<String>) -> Self {
        Self { key, valid, data }
    }

    pub fn placeholder(key: VertexPrimaryKey) -> Self {
        Self::new(key, false, None)
    }

    pub fn uri(&self) -> String {
        self.key.uri()
    }
}

/// Identity of a relationship: its target plus the locator that declared it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgePrimaryKey {
    pub to: VertexPrimaryKey,
    pub relationship_uri: String,
}

impl EdgePrimaryKey {
    pub fn new(to: VertexPrimaryKey, relationship_uri: impl Into<String>) -> Self {
        Self {
            to,
            relationship_uri: relationship_uri.into(),
        }
    }
}

/// A directed relationship with its source denormalized for traversal
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub key: EdgePrimaryKey,
    pub label: String,
    pub from: VertexPrimaryKey,
}

impl Edge {
    pub fn new(key: EdgePrimaryKey, label: impl Into<String>, from: VertexPrimaryKey) -> Self {
        Self {
            key,
            label: label.into(),
            from,
        }
    }

    pub fn to(&self) -> &VertexPrimaryKey {
        &self.key.to
    }
}

/// A link declared by a source document towards another document in the
/// same namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutgoingLink {
    /// Locator of the link inside the source document
    pub relationship_uri: String,
    /// Human-readable relationship label
    pub relationship_name: String,
    pub namespace: String,
    pub entity: String,
    pub id: String,
    pub target_entity: String,
    pub target_id: String,
}

impl OutgoingLink {
    /// Link whose relationship URI is derived as
    /// `/{namespace}/{entity}/{id}/{name}/{target_entity}/{target_id}`
    pub fn new(
        source: &VertexPrimaryKey,
        relationship_name: impl Into<String>,
        target_entity: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Self {
        let relationship_name = relationship_name.into();
        let target_entity = target_entity.into();
        let target_id = target_id.into();
        let relationship_uri = format!("{}/{}/{}/{}", source.uri(), relationship_name, target_entity, target_id);
        Self::with_uri(source, relationship_uri, relationship_name, target_entity, target_id)
    }

    pub fn with_uri(
        source: &VertexPrimaryKey,
        relationship_uri: impl Into<String>,
        relationship_name: impl Into<String>,
        target_entity: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Self {
        Self {
            relationship_uri: relationship_uri.into(),
            relationship_name: relationship_name.into(),
            namespace: source.namespace.clone(),
            entity: source.entity.clone(),
            id: source.id.clone(),
            target_entity: target_entity.into(),
            target_id: target_id.into(),
        }
    }

    pub fn source(&self) -> VertexPrimaryKey {
        VertexPrimaryKey::new(&self.namespace, &self.entity, &self.id)
    }

    pub fn target(&self) -> VertexPrimaryKey {
        VertexPrimaryKey::new(&self.namespace, &self.target_entity, &self.target_id)
    }

    pub fn edge_key(&self) -> EdgePrimaryKey {
        EdgePrimaryKey::new(self.target(), &self.relationship_uri)
    }

    pub fn to_edge(&self) -> Edge {
        Edge::new(self.edge_key(), &self.relationship_name, self.source())
    }

    /// Link as declared by the source of `edge`
    pub fn from_edge(edge: &Edge) -> Self {
        Self {
            relationship_uri: edge.key.relationship_uri.clone(),
            relationship_name: edge.label.clone(),
            namespace: edge.from.namespace.clone(),
            entity: edge.from.entity.clone(),
            id: edge.from.id.clone(),
            target_entity: edge.key.to.entity.clone(),
            target_id: edge.key.to.id.clone(),
        }
    }
}

/// Result of an insert-or-update.
///
/// `Anomaly` flags an update that was expected to touch exactly one row and
/// touched none; it is reported rather than raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// The row already existed and nothing was written
    Unchanged,
    Anomaly,
}

impl UpsertOutcome {
    pub fn is_consistent(&self) -> bool {
        !matches!(self, UpsertOutcome::Anomaly)
    }

    pub fn is_anomaly(&self) -> bool {
        matches!(self, UpsertOutcome::Anomaly)
    }
}
