//! Graph Link Store - entity writes and outgoing link reconciliation

use super::model::{Edge, EdgePrimaryKey, OutgoingLink, UpsertOutcome, Vertex, VertexPrimaryKey};
use super::repository::{EdgeRepository, Repository, VertexRepository};
use crate::config::StoreOptions;
use crate::storage::Transaction;
use crate::{Error, Result};
use std::collections::HashSet;

/// Edges written by one reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkMerge {
    pub created: Vec<Edge>,
    pub removed: Vec<Edge>,
    /// Placeholder vertices created for missing targets
    pub placeholders: Vec<VertexPrimaryKey>,
}

impl LinkMerge {
    /// Whether the merge performed any write
    pub fn changed(&self) -> bool {
        !self.created.is_empty() || !self.removed.is_empty() || !self.placeholders.is_empty()
    }
}

/// Vertex/edge persistence over one transaction.
pub struct GraphStore<'tx> {
    tx: &'tx Transaction<'tx>,
    options: StoreOptions,
}

impl<'tx> GraphStore<'tx> {
    pub fn new(tx: &'tx Transaction<'tx>) -> Self {
        Self::with_options(tx, StoreOptions::default())
    }

    pub fn with_options(tx: &'tx Transaction<'tx>, options: StoreOptions) -> Self {
        Self { tx, options }
    }

    fn vertices(&self) -> VertexRepository<'tx> {
        VertexRepository::new(self.tx.connection())
    }

    fn edges(&self) -> EdgeRepository<'tx> {
        EdgeRepository::new(self.tx.connection())
    }

    // ========== Write Operations ==========

    /// Upsert the vertex for `key` as a valid entity holding `document`.
    ///
    /// A placeholder row for the same key is turned valid in place.
    pub fn create_or_overwrite_entity(&self, key: &VertexPrimaryKey, document: &serde_json::Value) -> Result<UpsertOutcome> {
        let data = serde_json::to_string(document)?;
        let outcome = self.vertices().create_or_update(&Vertex::new(key.clone(), true, Some(data)))?;
        match outcome {
            UpsertOutcome::Inserted => self.tx.record("vertex.insert", 1),
            UpsertOutcome::Updated => self.tx.record("vertex.update", 1),
            UpsertOutcome::Anomaly => {
                self.tx.record("vertex.anomaly", 1);
                tracing::warn!("vertex {} was not updated", key);
            }
            UpsertOutcome::Unchanged => {}
        }
        Ok(outcome)
    }

    /// Make the outgoing edges of `source` match `wanted`.
    ///
    /// Running it again with the same links writes nothing.
    pub fn merge_outgoing_links(&self, source: &VertexPrimaryKey, wanted: &[OutgoingLink]) -> Result<LinkMerge> {
        let existing = self.edges().find_outgoing(source)?;
        self.reconcile(source, wanted, &existing)
    }

    /// Upsert the entity then reconcile its links
    pub fn write_entity(
        &self,
        key: &VertexPrimaryKey,
        document: &serde_json::Value,
        links: &[OutgoingLink],
    ) -> Result<(UpsertOutcome, LinkMerge)> {
        check_sources(key, links)?;
        let outcome = self.create_or_overwrite_entity(key, document)?;
        // a vertex inserted just now cannot have outgoing edges yet
        let existing = if outcome == UpsertOutcome::Inserted {
            Vec::new()
        } else {
            self.edges().find_outgoing(key)?
        };
        let merge = self.reconcile(key, links, &existing)?;
        Ok((outcome, merge))
    }

    /// Remove the entity with every edge touching it.
    ///
    /// Returns false when no vertex existed.
    pub fn delete_entity(&self, key: &VertexPrimaryKey) -> Result<bool> {
        let edges = self.edges();
        let mut removed = 0;
        for edge in edges.find_incoming(key)? {
            removed += edges.delete(&edge.key)? as u64;
        }
        for edge in edges.find_outgoing(key)? {
            removed += edges.delete(&edge.key)? as u64;
        }
        self.tx.record("edge.delete", removed);

        let deleted = self.vertices().delete(key)?;
        if deleted {
            self.tx.record("vertex.delete", 1);
        }
        tracing::debug!(edges = removed, vertex = deleted, "deleted entity {}", key);
        Ok(deleted)
    }

    fn reconcile(&self, source: &VertexPrimaryKey, wanted: &[OutgoingLink], existing: &[Edge]) -> Result<LinkMerge> {
        check_sources(source, wanted)?;

        let mut wanted_keys = HashSet::new();
        let to_create: Vec<&OutgoingLink> = wanted
            .iter()
            .filter(|link| wanted_keys.insert(link.edge_key()))
            .collect();
        let existing_keys: HashSet<&EdgePrimaryKey> = existing.iter().map(|edge| &edge.key).collect();
        let to_create: Vec<&OutgoingLink> = to_create
            .into_iter()
            .filter(|link| !existing_keys.contains(&link.edge_key()))
            .collect();
        let to_remove: Vec<&Edge> = existing.iter().filter(|edge| !wanted_keys.contains(&edge.key)).collect();

        tracing::debug!(
            create = to_create.len(),
            remove = to_remove.len(),
            "reconciling outgoing links of {}",
            source
        );

        let vertices = self.vertices();
        let edges = self.edges();
        let mut merge = LinkMerge::default();

        for link in to_create {
            let target = link.target();
            if vertices.find(&target)?.is_none() {
                vertices.create_or_update(&Vertex::placeholder(target.clone()))?;
                merge.placeholders.push(target);
            }
            let edge = link.to_edge();
            if edges.create_or_update(&edge)? == UpsertOutcome::Inserted {
                merge.created.push(edge);
            }
        }

        for edge in to_remove {
            if edges.delete(&edge.key)? {
                merge.removed.push(edge.clone());
            }
        }

        self.tx.record("vertex.placeholder", merge.placeholders.len() as u64);
        self.tx.record("edge.insert", merge.created.len() as u64);
        self.tx.record("edge.delete", merge.removed.len() as u64);
        Ok(merge)
    }

    // ========== Read Operations ==========

    /// The document of a valid vertex; placeholders read as absent
    pub fn get_entity(&self, key: &VertexPrimaryKey) -> Result<Option<serde_json::Value>> {
        let Some(vertex) = self.vertices().find_filtered(key, Some(true))? else {
            return Ok(None);
        };
        match vertex.data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    /// Up to `list_limit` valid documents of one entity type, ordered by id
    pub fn get_entities(&self, namespace: &str, entity: &str) -> Result<Vec<serde_json::Value>> {
        Ok(self.list_entities(namespace, entity)?.into_iter().map(|(_, doc)| doc).collect())
    }

    /// Like [`GraphStore::get_entities`], keyed by id
    pub fn list_entities(&self, namespace: &str, entity: &str) -> Result<Vec<(String, serde_json::Value)>> {
        self.vertices()
            .find_all(namespace, entity, Some(true), self.options.list_limit)?
            .into_iter()
            .map(|(id, data)| Ok((id, serde_json::from_str(&data)?)))
            .collect()
    }

    /// Links declared by `key`
    pub fn get_outgoing_links(&self, key: &VertexPrimaryKey) -> Result<Vec<OutgoingLink>> {
        Ok(self.edges().find_outgoing(key)?.iter().map(OutgoingLink::from_edge).collect())
    }

    /// Links other documents declare towards `key`
    pub fn get_incoming_links(&self, key: &VertexPrimaryKey) -> Result<Vec<OutgoingLink>> {
        Ok(self.edges().find_incoming(key)?.iter().map(OutgoingLink::from_edge).collect())
    }

    /// Stored vertex row, placeholders included
    pub fn get_vertex(&self, key: &VertexPrimaryKey) -> Result<Option<Vertex>> {
        self.vertices().find(key)
    }
}

fn check_sources(source: &VertexPrimaryKey, links: &[OutgoingLink]) -> Result<()> {
    for link in links {
        if &link.source() != source {
            return Err(Error::ContractViolation(format!(
                "link {} is declared by {}, not {}",
                link.relationship_uri,
                link.source(),
                source
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteSource;
    use serde_json::json;

    fn key(entity: &str, id: &str) -> VertexPrimaryKey {
        VertexPrimaryKey::new("data", entity, id)
    }

    fn vertex_rows(tx: &Transaction<'_>) -> i64 {
        tx.connection()
            .query_row("SELECT COUNT(*) FROM vertex", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_link_to_missing_target_creates_placeholder() {
        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let graph = GraphStore::new(&tx);
        let a = key("contact", "A");
        let b = key("contact", "B");
        let link = OutgoingLink::new(&a, "friend", "contact", "B");

        let (outcome, merge) = graph.write_entity(&a, &json!({"name": "A"}), &[link.clone()]).unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);
        assert_eq!(merge.placeholders, vec![b.clone()]);
        assert_eq!(merge.created, vec![link.to_edge()]);

        let placeholder = graph.get_vertex(&b).unwrap().unwrap();
        assert!(!placeholder.valid);
        assert_eq!(placeholder.data, None);
        assert_eq!(graph.get_entity(&b).unwrap(), None);
        assert_eq!(vertex_rows(&tx), 2);

        let (outcome, merge) = graph.write_entity(&b, &json!({"name": "B"}), &[]).unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);
        assert!(!merge.changed());
        assert_eq!(vertex_rows(&tx), 2);
        assert!(graph.get_vertex(&b).unwrap().unwrap().valid);
        assert_eq!(graph.get_entity(&b).unwrap(), Some(json!({"name": "B"})));
        assert_eq!(graph.get_incoming_links(&b).unwrap(), vec![link]);

        let stats = tx.commit().unwrap();
        assert_eq!(stats.get("vertex.insert"), 1);
        assert_eq!(stats.get("vertex.update"), 1);
        assert_eq!(stats.get("vertex.placeholder"), 1);
        assert_eq!(stats.get("edge.insert"), 1);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let graph = GraphStore::new(&tx);
        let a = key("provisionagreement", "100");
        let links = vec![
            OutgoingLink::new(&a, "contacts", "contact", "101"),
            OutgoingLink::new(&a, "contacts", "contact", "102"),
        ];

        graph.create_or_overwrite_entity(&a, &json!({})).unwrap();
        let first = graph.merge_outgoing_links(&a, &links).unwrap();
        assert_eq!(first.created.len(), 2);
        assert!(first.changed());

        let writes_before = tx.statistics();
        let second = graph.merge_outgoing_links(&a, &links).unwrap();
        assert!(!second.changed());
        assert_eq!(tx.statistics(), writes_before);
    }

    #[test]
    fn test_merge_removes_dropped_links() {
        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let graph = GraphStore::new(&tx);
        let a = key("provisionagreement", "100");
        let keep = OutgoingLink::new(&a, "contacts", "contact", "101");
        let drop = OutgoingLink::new(&a, "contacts", "contact", "102");

        graph.write_entity(&a, &json!({}), &[keep.clone(), drop.clone()]).unwrap();
        let (_, merge) = graph.write_entity(&a, &json!({"v": 2}), &[keep.clone(), keep.clone()]).unwrap();
        assert!(merge.created.is_empty());
        assert_eq!(merge.removed, vec![drop.to_edge()]);
        assert_eq!(graph.get_outgoing_links(&a).unwrap(), vec![keep]);
    }

    #[test]
    fn test_foreign_source_link_rejected() {
        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let graph = GraphStore::new(&tx);
        let a = key("contact", "A");
        let other = OutgoingLink::new(&key("contact", "Z"), "friend", "contact", "B");

        let err = graph.write_entity(&a, &json!({}), &[other]).unwrap_err();
        assert!(err.is_contract_violation());
        assert_eq!(vertex_rows(&tx), 0);
    }

    #[test]
    fn test_delete_entity_removes_edges_first() {
        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let graph = GraphStore::new(&tx);
        let a = key("contact", "A");
        let b = key("contact", "B");
        let c = key("contact", "C");

        graph.write_entity(&a, &json!({}), &[OutgoingLink::new(&a, "friend", "contact", "B")]).unwrap();
        graph.write_entity(&b, &json!({}), &[OutgoingLink::new(&b, "friend", "contact", "C")]).unwrap();
        graph.write_entity(&c, &json!({}), &[]).unwrap();

        assert!(graph.delete_entity(&b).unwrap());
        assert!(graph.get_vertex(&b).unwrap().is_none());
        assert!(graph.get_outgoing_links(&a).unwrap().is_empty());
        assert!(graph.get_incoming_links(&c).unwrap().is_empty());
        assert!(!graph.delete_entity(&b).unwrap());
    }

    #[test]
    fn test_get_entities_lists_valid_documents() {
        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let graph = GraphStore::with_options(&tx, StoreOptions { list_limit: 2, ..StoreOptions::default() });
        let a = key("contact", "A");

        graph.write_entity(&a, &json!({"id": "A"}), &[OutgoingLink::new(&a, "friend", "contact", "B")]).unwrap();
        graph.create_or_overwrite_entity(&key("contact", "C"), &json!({"id": "C"})).unwrap();
        graph.create_or_overwrite_entity(&key("contact", "D"), &json!({"id": "D"})).unwrap();

        let listed = graph.get_entities("data", "contact").unwrap();
        assert_eq!(listed, vec![json!({"id": "A"}), json!({"id": "C"})]);
    }
}
