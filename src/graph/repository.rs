//! Row-level access to the `vertex` and `edge` tables

use super::model::{Edge, EdgePrimaryKey, UpsertOutcome, Vertex, VertexPrimaryKey};
use crate::Result;
use rusqlite::{params, Connection, OptionalExtension};

/// Keyed create/delete/find over one table
pub trait Repository {
    type Value;
    type Key;

    fn create_or_update(&self, value: &Self::Value) -> Result<UpsertOutcome>;

    /// Returns whether a row was removed
    fn delete(&self, key: &Self::Key) -> Result<bool>;

    fn find(&self, key: &Self::Key) -> Result<Option<Self::Value>>;
}

/// Access to the `vertex` table on one session
pub struct VertexRepository<'c> {
    conn: &'c Connection,
}

impl<'c> VertexRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Find a vertex, optionally restricted to valid (or placeholder) rows
    pub fn find_filtered(&self, key: &VertexPrimaryKey, valid: Option<bool>) -> Result<Option<Vertex>> {
        let sql = match valid {
            None => "SELECT namespace, entity, id, valid, data FROM vertex WHERE namespace = ?1 AND entity = ?2 AND id = ?3",
            Some(_) => "SELECT namespace, entity, id, valid, data FROM vertex WHERE namespace = ?1 AND entity = ?2 AND id = ?3 AND valid = ?4",
        };
        let mut stmt = self.conn.prepare_cached(sql)?;
        let vertex = match valid {
            None => stmt.query_row(params![key.namespace, key.entity, key.id], row_to_vertex),
            Some(valid) => stmt.query_row(params![key.namespace, key.entity, key.id, valid], row_to_vertex),
        }
        .optional()?;
        Ok(vertex)
    }

    /// `(id, data)` of up to `limit` vertices of one entity type, by id
    pub fn find_all(&self, namespace: &str, entity: &str, valid: Option<bool>, limit: usize) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT id, data FROM vertex
            WHERE namespace = ?1 AND entity = ?2 AND (?3 IS NULL OR valid = ?3) AND data IS NOT NULL
            ORDER BY id
            LIMIT ?4
            "#,
        )?;
        let data = stmt
            .query_map(params![namespace, entity, valid, limit as i64], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(data)
    }
}

impl Repository for VertexRepository<'_> {
    type Value = Vertex;
    type Key = VertexPrimaryKey;

    /// Insert when absent, otherwise update `valid` and `data` in place
    fn create_or_update(&self, vertex: &Vertex) -> Result<UpsertOutcome> {
        let key = &vertex.key;
        if self.find(key)?.is_none() {
            self.conn
                .prepare_cached("INSERT INTO vertex (namespace, entity, id, valid, uri, data) VALUES (?1, ?2, ?3, ?4, ?5, ?6)")?
                .execute(params![key.namespace, key.entity, key.id, vertex.valid, vertex.uri(), vertex.data])?;
            return Ok(UpsertOutcome::Inserted);
        }

        let affected = self
            .conn
            .prepare_cached("UPDATE vertex SET valid = ?1, data = ?2 WHERE namespace = ?3 AND entity = ?4 AND id = ?5")?
            .execute(params![vertex.valid, vertex.data, key.namespace, key.entity, key.id])?;
        if affected == 0 {
            tracing::warn!("update of vertex {} affected no rows", key);
            return Ok(UpsertOutcome::Anomaly);
        }
        Ok(UpsertOutcome::Updated)
    }

    fn delete(&self, key: &VertexPrimaryKey) -> Result<bool> {
        let n = self
            .conn
            .prepare_cached("DELETE FROM vertex WHERE namespace = ?1 AND entity = ?2 AND id = ?3")?
            .execute(params![key.namespace, key.entity, key.id])?;
        Ok(n > 0)
    }

    fn find(&self, key: &VertexPrimaryKey) -> Result<Option<Vertex>> {
        self.find_filtered(key, None)
    }
}

fn row_to_vertex(row: &rusqlite::Row<'_>) -> rusqlite::Result<Vertex> {
    Ok(Vertex::new(
        VertexPrimaryKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?),
        row.get(3)?,
        row.get(4)?,
    ))
}

const EDGE_COLUMNS: &str = "vertex_to_namespace, vertex_to_entity, vertex_to_id, vertex_from_relationship_uri, \
     vertex_from_label, vertex_from_namespace, vertex_from_entity, vertex_from_id";

/// Access to the `edge` table on one session
pub struct EdgeRepository<'c> {
    conn: &'c Connection,
}

impl<'c> EdgeRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Edges pointing at `key`
    pub fn find_incoming(&self, key: &VertexPrimaryKey) -> Result<Vec<Edge>> {
        self.query_edges(
            &format!(
                "SELECT {EDGE_COLUMNS} FROM edge WHERE vertex_to_namespace = ?1 AND vertex_to_entity = ?2 AND vertex_to_id = ?3 \
                 ORDER BY vertex_from_relationship_uri"
            ),
            key,
        )
    }

    /// Edges declared by `key`
    pub fn find_outgoing(&self, key: &VertexPrimaryKey) -> Result<Vec<Edge>> {
        self.query_edges(
            &format!(
                "SELECT {EDGE_COLUMNS} FROM edge WHERE vertex_from_namespace = ?1 AND vertex_from_entity = ?2 AND vertex_from_id = ?3 \
                 ORDER BY vertex_from_relationship_uri"
            ),
            key,
        )
    }

    fn query_edges(&self, sql: &str, key: &VertexPrimaryKey) -> Result<Vec<Edge>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let edges = stmt
            .query_map(params![key.namespace, key.entity, key.id], row_to_edge)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(edges)
    }
}

impl Repository for EdgeRepository<'_> {
    type Value = Edge;
    type Key = EdgePrimaryKey;

    /// Insert when absent; an existing edge is left untouched
    fn create_or_update(&self, edge: &Edge) -> Result<UpsertOutcome> {
        if self.find(&edge.key)?.is_some() {
            return Ok(UpsertOutcome::Unchanged);
        }
        let to = &edge.key.to;
        self.conn
            .prepare_cached(&format!("INSERT INTO edge ({EDGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"))?
            .execute(params![
                to.namespace,
                to.entity,
                to.id,
                edge.key.relationship_uri,
                edge.label,
                edge.from.namespace,
                edge.from.entity,
                edge.from.id,
            ])?;
        Ok(UpsertOutcome::Inserted)
    }

    fn delete(&self, key: &EdgePrimaryKey) -> Result<bool> {
        let n = self
            .conn
            .prepare_cached(
                "DELETE FROM edge WHERE vertex_to_namespace = ?1 AND vertex_to_entity = ?2 AND vertex_to_id = ?3 \
                 AND vertex_from_relationship_uri = ?4",
            )?
            .execute(params![key.to.namespace, key.to.entity, key.to.id, key.relationship_uri])?;
        Ok(n > 0)
    }

    fn find(&self, key: &EdgePrimaryKey) -> Result<Option<Edge>> {
        let edge = self
            .conn
            .prepare_cached(&format!(
                "SELECT {EDGE_COLUMNS} FROM edge WHERE vertex_to_namespace = ?1 AND vertex_to_entity = ?2 \
                 AND vertex_to_id = ?3 AND vertex_from_relationship_uri = ?4"
            ))?
            .query_row(
                params![key.to.namespace, key.to.entity, key.to.id, key.relationship_uri],
                row_to_edge,
            )
            .optional()?;
        Ok(edge)
    }
}

fn row_to_edge(row: &rusqlite::Row<'_>) -> rusqlite::Result<Edge> {
    let to = VertexPrimaryKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?);
    let from = VertexPrimaryKey::new(row.get::<_, String>(5)?, row.get::<_, String>(6)?, row.get::<_, String>(7)?);
    Ok(Edge::new(
        EdgePrimaryKey::new(to, row.get::<_, String>(3)?),
        row.get::<_, String>(4)?,
        from,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteSource;

    fn contact() -> Vertex {
        Vertex::new(VertexPrimaryKey::new("data", "contact", "101"), true, Some(r#"{"foo":"bar"}"#.to_string()))
    }

    fn agreement() -> Vertex {
        Vertex::new(VertexPrimaryKey::new("data", "provisionagreement", "100"), true, Some(r#"{"foo":"bar"}"#.to_string()))
    }

    fn friend_edge() -> Edge {
        Edge::new(
            EdgePrimaryKey::new(contact().key, "/data/provisionagreement/100/contacts/contact/101"),
            "FRIEND_HAS_REF_TO",
            agreement().key,
        )
    }

    #[test]
    fn test_vertex_create_then_update() {
        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let vertices = VertexRepository::new(tx.connection());

        assert_eq!(vertices.create_or_update(&contact()).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(vertices.create_or_update(&contact()).unwrap(), UpsertOutcome::Updated);

        let found = vertices.find(&contact().key).unwrap().unwrap();
        assert_eq!(found, contact());
        assert!(vertices.find_filtered(&contact().key, Some(false)).unwrap().is_none());
    }

    #[test]
    fn test_find_all_skips_placeholders() {
        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let vertices = VertexRepository::new(tx.connection());

        vertices.create_or_update(&contact()).unwrap();
        vertices
            .create_or_update(&Vertex::placeholder(VertexPrimaryKey::new("data", "contact", "102")))
            .unwrap();
        assert_eq!(vertices.find_all("data", "contact", Some(true), 250).unwrap().len(), 1);
        assert_eq!(vertices.find_all("data", "contact", None, 250).unwrap().len(), 1);
        assert_eq!(vertices.find_all("data", "contact", Some(false), 250).unwrap().len(), 0);
    }

    #[test]
    fn test_edge_create_is_idempotent() {
        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let vertices = VertexRepository::new(tx.connection());
        let edges = EdgeRepository::new(tx.connection());

        vertices.create_or_update(&contact()).unwrap();
        vertices.create_or_update(&agreement()).unwrap();
        assert_eq!(edges.create_or_update(&friend_edge()).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(edges.create_or_update(&friend_edge()).unwrap(), UpsertOutcome::Unchanged);

        assert_eq!(edges.find_outgoing(&agreement().key).unwrap(), vec![friend_edge()]);
        assert_eq!(edges.find_incoming(&contact().key).unwrap(), vec![friend_edge()]);
        assert!(edges.find_outgoing(&contact().key).unwrap().is_empty());
    }

    #[test]
    fn test_vertex_delete_rejected_while_edges_exist() {
        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let vertices = VertexRepository::new(tx.connection());
        let edges = EdgeRepository::new(tx.connection());

        vertices.create_or_update(&contact()).unwrap();
        vertices.create_or_update(&agreement()).unwrap();
        edges.create_or_update(&friend_edge()).unwrap();

        assert!(vertices.delete(&contact().key).unwrap_err().is_storage_failure());
        assert!(vertices.delete(&agreement().key).unwrap_err().is_storage_failure());

        assert!(edges.delete(&friend_edge().key).unwrap());
        assert!(vertices.delete(&contact().key).unwrap());
        assert!(vertices.delete(&agreement().key).unwrap());
        assert!(!vertices.delete(&agreement().key).unwrap());
    }
}
