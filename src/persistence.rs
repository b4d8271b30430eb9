//! Document persistence behind one interface, two storage models
//!
//! `Fragments` keeps every revision as path-addressed fragments and reads
//! at a snapshot. `Graph` keeps the latest document as an opaque vertex
//! blob plus explicit edges, so it ignores versions. The two never share
//! storage.

use crate::config::{FragstoreConfig, StoreOptions, Strategy};
use crate::document;
use crate::fragment::{is_tombstone, DocumentKey, Fragment};
use crate::graph::{GraphStore, OutgoingLink, VertexPrimaryKey};
use crate::range::Range;
use crate::storage::{FragmentStore, Transaction};
use crate::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Storage model selected at configuration time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentPersistence {
    Fragments(StoreOptions),
    Graph(StoreOptions),
}

impl DocumentPersistence {
    pub fn from_config(config: &FragstoreConfig) -> Self {
        match config.strategy {
            Strategy::Fragments => DocumentPersistence::Fragments(config.options()),
            Strategy::Graph => DocumentPersistence::Graph(config.options()),
        }
    }

    pub fn strategy(&self) -> Strategy {
        match self {
            DocumentPersistence::Fragments(_) => Strategy::Fragments,
            DocumentPersistence::Graph(_) => Strategy::Graph,
        }
    }

    /// Store `document` as the revision at `version`.
    ///
    /// Links are reconciled by the graph model only.
    pub fn write_document(
        &self,
        tx: &Transaction<'_>,
        key: &DocumentKey,
        version: DateTime<Utc>,
        document: &Value,
        links: &[OutgoingLink],
    ) -> Result<()> {
        match *self {
            DocumentPersistence::Fragments(options) => {
                let store = FragmentStore::with_options(tx, options);
                store.create_or_overwrite(document::decompose(key, version, document))
            }
            DocumentPersistence::Graph(options) => {
                let graph = GraphStore::with_options(tx, options);
                let (outcome, merge) = graph.write_entity(&vertex_key(key), document, links)?;
                tracing::debug!(?outcome, changed = merge.changed(), "wrote {}", key);
                Ok(())
            }
        }
    }

    /// The document as of `snapshot`; `None` when absent or deleted
    pub fn read_document(&self, tx: &Transaction<'_>, key: &DocumentKey, snapshot: DateTime<Utc>) -> Result<Option<Value>> {
        match *self {
            DocumentPersistence::Fragments(options) => {
                let store = FragmentStore::with_options(tx, options);
                let fragments = store.read(&key.namespace, &key.entity, &key.id, snapshot).collect_all()?;
                document::recompose(&fragments)
            }
            DocumentPersistence::Graph(options) => GraphStore::with_options(tx, options).get_entity(&vertex_key(key)),
        }
    }

    /// Delete the document; returns whether a live document existed.
    ///
    /// The fragment model writes a tombstone at `version` so earlier
    /// revisions stay readable. The graph model removes the vertex and
    /// every edge touching it.
    pub fn delete_document(&self, tx: &Transaction<'_>, key: &DocumentKey, version: DateTime<Utc>) -> Result<bool> {
        match *self {
            DocumentPersistence::Fragments(options) => {
                let existed = self.read_document(tx, key, version)?.is_some();
                if existed {
                    FragmentStore::with_options(tx, options).mark_deleted(&key.namespace, &key.entity, &key.id, version)?;
                }
                Ok(existed)
            }
            DocumentPersistence::Graph(options) => GraphStore::with_options(tx, options).delete_entity(&vertex_key(key)),
        }
    }

    /// Up to `list_limit` live documents of one entity type, ordered by id
    pub fn list_documents(
        &self,
        tx: &Transaction<'_>,
        namespace: &str,
        entity: &str,
        snapshot: DateTime<Utc>,
    ) -> Result<Vec<(String, Value)>> {
        match *self {
            DocumentPersistence::Fragments(options) => {
                let store = FragmentStore::with_options(tx, options);
                let mut rows = store.read_all(namespace, entity, snapshot, &Range::unbounded()).into_iter();
                let mut documents = Vec::new();
                let mut current: Vec<Fragment> = Vec::new();

                while documents.len() < options.list_limit {
                    let next = rows.next().transpose()?;
                    let boundary = match (&next, current.first()) {
                        (Some(f), Some(first)) => f.id != first.id,
                        (None, Some(_)) => true,
                        (_, None) => false,
                    };
                    if boundary {
                        let fragments = std::mem::take(&mut current);
                        if !is_tombstone(&fragments) {
                            if let Some(doc) = document::recompose(&fragments)? {
                                documents.push((fragments[0].id.clone(), doc));
                            }
                        }
                    }
                    match next {
                        Some(f) => current.push(f),
                        None => break,
                    }
                }
                rows.cancel();
                Ok(documents)
            }
            DocumentPersistence::Graph(options) => GraphStore::with_options(tx, options).list_entities(namespace, entity),
        }
    }
}

fn vertex_key(key: &DocumentKey) -> VertexPrimaryKey {
    VertexPrimaryKey::new(&key.namespace, &key.entity, &key.id)
}
