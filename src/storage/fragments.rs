//! Fragment Store - batched writer and snapshot-consistent reader
//!
//! Every read returns a lazy [`FragmentStream`]; nothing executes until the
//! stream is subscribed to and demand is requested.

use super::transaction::Transaction;
use crate::codec;
use crate::config::StoreOptions;
use crate::fragment::{DocumentKey, Fragment, FragmentType};
use crate::range::Range;
use crate::stream::{Publisher, QueryCursor, SeekKey, SEEK_MARKER};
use crate::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection, Row};
use std::collections::HashSet;

/// Lazy stream of fragments bound to a transaction
pub type FragmentStream<'tx> = Publisher<QueryCursor<'tx, Fragment>>;

const INSERT_FRAGMENT: &str = r#"
    INSERT INTO fragment (namespace, entity, id, version, path, indices, type, value)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
"#;

const DELETE_VERSION: &str =
    "DELETE FROM fragment WHERE namespace = ?1 AND entity = ?2 AND id = ?3 AND version = ?4";

const DELETE_ALL_VERSIONS: &str = "DELETE FROM fragment WHERE namespace = ?1 AND entity = ?2 AND id = ?3";

const FRAGMENT_COLUMNS: &str = "namespace, entity, id, version, path, indices, type, value";

const JOINED_COLUMNS: &str = "n.namespace, n.entity, n.id, n.version, n.path, n.indices, n.type, n.value";

/// Ordering key of single-document reads
fn version_key() -> SeekKey {
    SeekKey::new("(version, path, indices, type)", [3, 4, 5, 6])
}

/// Ordering key of reads across documents
fn id_key() -> SeekKey {
    SeekKey::new("(n.id, n.version, n.path, n.indices, n.type)", [2, 3, 4, 5, 6])
}

/// Lower bound used when a version range has no `after`
pub fn beginning_of_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1900, 1, 1, 0, 0, 0).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Upper bound used when a version range has no `before`
pub fn end_of_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(9999, 1, 1, 0, 0, 0).single().unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Fragment persistence over the `fragment` table of one transaction.
pub struct FragmentStore<'tx> {
    tx: &'tx Transaction<'tx>,
    options: StoreOptions,
}

impl<'tx> FragmentStore<'tx> {
    pub fn new(tx: &'tx Transaction<'tx>) -> Self {
        Self::with_options(tx, StoreOptions::default())
    }

    pub fn with_options(tx: &'tx Transaction<'tx>, options: StoreOptions) -> Self {
        Self { tx, options }
    }

    fn conn(&self) -> &'tx Connection {
        self.tx.connection()
    }

    // ========== Write Operations ==========

    /// Write one or more document revisions.
    ///
    /// The first fragment seen for each `(document, version)` supersedes any
    /// rows already stored for that exact version. Statements are flushed in
    /// batches; any failure fails the whole call and leaves rollback to the
    /// caller.
    pub fn create_or_overwrite<I>(&self, fragments: I) -> Result<()>
    where
        I: IntoIterator<Item = Fragment>,
    {
        let mut batch = WriteBatch::new(self.conn(), self.options.batch_size);
        for fragment in fragments {
            if fragment.offset != 0 {
                return Err(Error::ContractViolation(format!(
                    "fragments must have offset == 0, illegal offset {} at {}{}",
                    fragment.offset,
                    fragment.document_key(),
                    fragment.path
                )));
            }
            batch.push(fragment)?;
        }
        batch.flush()?;

        self.tx.record("fragment.insert", batch.inserted);
        self.tx.record("fragment.supersede", batch.superseded);
        tracing::debug!(
            inserted = batch.inserted,
            superseded = batch.superseded,
            "create_or_overwrite finished"
        );
        Ok(())
    }

    /// Remove the rows of one exact version
    pub fn delete(&self, namespace: &str, entity: &str, id: &str, version: DateTime<Utc>) -> Result<usize> {
        let n = self
            .conn()
            .prepare_cached(DELETE_VERSION)?
            .execute(params![namespace, entity, id, version.timestamp_millis()])?;
        self.tx.record("fragment.delete", n as u64);
        Ok(n)
    }

    /// Remove every row of every version of a document
    pub fn delete_all_versions(&self, namespace: &str, entity: &str, id: &str) -> Result<usize> {
        let n = self
            .conn()
            .prepare_cached(DELETE_ALL_VERSIONS)?
            .execute(params![namespace, entity, id])?;
        self.tx.record("fragment.delete", n as u64);
        Ok(n)
    }

    /// Supersede `version` with a tombstone at the empty path
    pub fn mark_deleted(&self, namespace: &str, entity: &str, id: &str, version: DateTime<Utc>) -> Result<()> {
        self.create_or_overwrite([Fragment::deleted_marker(namespace, entity, id, version)])
    }

    // ========== Read Operations ==========

    /// Fragments of the latest version not after `snapshot`
    pub fn read(&self, namespace: &str, entity: &str, id: &str, snapshot: DateTime<Utc>) -> FragmentStream<'tx> {
        let sql = format!(
            r#"SELECT {FRAGMENT_COLUMNS} FROM fragment
            WHERE namespace = ?1 AND entity = ?2 AND id = ?3 AND version = (
                SELECT max(version) FROM fragment
                WHERE namespace = ?1 AND entity = ?2 AND id = ?3 AND version <= ?4
            ){SEEK_MARKER}
            ORDER BY version, path, indices, type"#
        );
        let params = vec![
            text(namespace),
            text(entity),
            text(id),
            Value::Integer(snapshot.timestamp_millis()),
        ];
        self.stream(sql, params, version_key(), None)
    }

    /// Fragments of every version in `range`, plus the baseline version
    /// (latest not after `range.after`) needed to reconstruct the document
    /// as of `after`.
    pub fn read_versions(
        &self,
        namespace: &str,
        entity: &str,
        id: &str,
        range: &Range<DateTime<Utc>>,
    ) -> FragmentStream<'tx> {
        let after = range.after.unwrap_or_else(beginning_of_time);
        let before = range.before.unwrap_or_else(end_of_time);
        let sql = format!(
            r#"SELECT {FRAGMENT_COLUMNS} FROM fragment
            WHERE namespace = ?1 AND entity = ?2 AND id = ?3 AND version < ?5
              AND version >= coalesce((
                SELECT max(version) FROM fragment
                WHERE namespace = ?1 AND entity = ?2 AND id = ?3 AND version <= ?4
              ), ?4){SEEK_MARKER}
            ORDER BY version, path, indices, type"#
        );
        let params = vec![
            text(namespace),
            text(entity),
            text(id),
            Value::Integer(after.timestamp_millis()),
            Value::Integer(before.timestamp_millis()),
        ];
        self.stream(sql, params, version_key(), range.limit)
    }

    /// For every id in the exclusive id range, the fragments of its latest
    /// version not after `snapshot`. `range.limit` caps rows, not documents.
    pub fn read_all(
        &self,
        namespace: &str,
        entity: &str,
        snapshot: DateTime<Utc>,
        range: &Range<String>,
    ) -> FragmentStream<'tx> {
        let mut params = vec![text(namespace), text(entity), Value::Integer(snapshot.timestamp_millis())];
        let bounds = id_bounds("id", range, &mut params);
        let sql = format!(
            r#"SELECT {JOINED_COLUMNS} FROM fragment n
            JOIN (
                SELECT id, max(version) AS version FROM fragment
                WHERE namespace = ?1 AND entity = ?2 AND version <= ?3{bounds}
                GROUP BY id
            ) a ON n.id = a.id AND n.version = a.version
            WHERE n.namespace = ?1 AND n.entity = ?2{SEEK_MARKER}
            ORDER BY n.id, n.version, n.path, n.indices, n.type"#
        );
        self.stream(sql, params, id_key(), range.limit)
    }

    /// Like [`FragmentStore::read_all`], restricted to documents whose
    /// snapshot version holds `value` at `path`.
    ///
    /// Concrete indices in `path` must match exactly; a bare `[]` slot
    /// matches any array element, and both may be mixed, as in
    /// `/items[2]/tags[]`. `range.limit` caps documents and defaults to
    /// `find_limit`.
    pub fn find(
        &self,
        namespace: &str,
        entity: &str,
        snapshot: DateTime<Utc>,
        path: &str,
        value: &[u8],
        range: &Range<String>,
    ) -> Result<FragmentStream<'tx>> {
        let (unaware, slots) = codec::encode_pattern(path)?;

        let mut params = vec![
            text(namespace),
            text(entity),
            Value::Integer(snapshot.timestamp_millis()),
            Value::Text(unaware),
            Value::Blob(value.to_vec()),
        ];
        let mut filters = String::new();
        if slots.iter().all(Option::is_some) {
            let indices: Vec<u32> = slots.into_iter().flatten().collect();
            params.push(Value::Blob(codec::indices_to_blob(&indices)));
            filters.push_str(&format!(" AND m.indices = ?{}", params.len()));
        } else {
            // each index occupies 4 bytes of the blob
            for (slot, index) in slots.into_iter().enumerate() {
                if let Some(index) = index {
                    params.push(Value::Blob(index.to_be_bytes().to_vec()));
                    filters.push_str(&format!(" AND substr(m.indices, {}, 4) = ?{}", slot * 4 + 1, params.len()));
                }
            }
        }
        filters.push_str(&id_bounds("m.id", range, &mut params));
        let limit = range.limit.unwrap_or(self.options.find_limit);
        params.push(Value::Integer(limit as i64));
        let limit_param = params.len();

        let sql = format!(
            r#"SELECT {JOINED_COLUMNS} FROM fragment n
            JOIN (
                SELECT m.id AS id, m.version AS version FROM fragment m
                JOIN (
                    SELECT id, max(version) AS version FROM fragment
                    WHERE namespace = ?1 AND entity = ?2 AND version <= ?3
                    GROUP BY id
                ) s ON m.id = s.id AND m.version = s.version
                WHERE m.namespace = ?1 AND m.entity = ?2 AND m.path = ?4 AND m.value = ?5{filters}
                GROUP BY m.id, m.version
                ORDER BY m.id
                LIMIT ?{limit_param}
            ) a ON n.id = a.id AND n.version = a.version
            WHERE n.namespace = ?1 AND n.entity = ?2{SEEK_MARKER}
            ORDER BY n.id, n.version, n.path, n.indices, n.type"#
        );
        Ok(self.stream(sql, params, id_key(), None))
    }

    /// Whether any document precedes `id` at `snapshot`
    pub fn has_previous(&self, namespace: &str, entity: &str, id: &str, snapshot: DateTime<Utc>) -> Result<bool> {
        let range = Range::last_before(1, id.to_string());
        Ok(!self.read_all(namespace, entity, snapshot, &range).is_empty()?)
    }

    /// Whether any document follows `id` at `snapshot`
    pub fn has_next(&self, namespace: &str, entity: &str, id: &str, snapshot: DateTime<Utc>) -> Result<bool> {
        let range = Range::first_after(1, id.to_string());
        Ok(!self.read_all(namespace, entity, snapshot, &range).is_empty()?)
    }

    fn stream(&self, sql: String, params: Vec<Value>, seek: SeekKey, limit: Option<usize>) -> FragmentStream<'tx> {
        let cursor = QueryCursor::new(self.conn(), sql, params, seek, fragment_from_row)
            .with_fetch_size(self.options.fetch_size)
            .with_limit(limit);
        Publisher::new(cursor)
    }
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

/// Exclusive id bounds as extra `AND` clauses, appending their parameters
fn id_bounds(column: &str, range: &Range<String>, params: &mut Vec<Value>) -> String {
    let mut clause = String::new();
    if let Some(after) = &range.after {
        params.push(Value::Text(after.clone()));
        clause.push_str(&format!(" AND {} > ?{}", column, params.len()));
    }
    if let Some(before) = &range.before {
        params.push(Value::Text(before.clone()));
        clause.push_str(&format!(" AND {} < ?{}", column, params.len()));
    }
    clause
}

fn fragment_from_row(row: &Row<'_>) -> Result<Fragment> {
    let millis: i64 = row.get(3)?;
    let version = DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| Error::ContractViolation(format!("stored version {} is out of range", millis)))?;
    let unaware: String = row.get(4)?;
    let blob: Vec<u8> = row.get(5)?;
    let indices = codec::blob_to_indices(&blob)?;
    let code: u8 = row.get(6)?;

    Ok(Fragment {
        namespace: row.get(0)?,
        entity: row.get(1)?,
        id: row.get(2)?,
        version,
        path: codec::decode(&unaware, &indices)?,
        fragment_type: FragmentType::from_code(code)?,
        offset: 0,
        value: row.get(7)?,
    })
}

/// Encoded fragment row waiting to be flushed
struct PendingInsert {
    key: DocumentKey,
    version: i64,
    path: String,
    indices: Vec<u8>,
    type_code: u8,
    value: Option<Vec<u8>>,
}

/// Pending supersede-deletes and inserts, flushed together.
///
/// Deletes always run before inserts within one flush, and a document's
/// delete is enqueued no later than its first insert.
struct WriteBatch<'c> {
    conn: &'c Connection,
    batch_size: usize,
    seen: HashSet<(DocumentKey, i64)>,
    deletes: Vec<(DocumentKey, i64)>,
    inserts: Vec<PendingInsert>,
    inserted: u64,
    superseded: u64,
}

impl<'c> WriteBatch<'c> {
    fn new(conn: &'c Connection, batch_size: usize) -> Self {
        Self {
            conn,
            batch_size: batch_size.max(1),
            seen: HashSet::new(),
            deletes: Vec::new(),
            inserts: Vec::new(),
            inserted: 0,
            superseded: 0,
        }
    }

    fn push(&mut self, fragment: Fragment) -> Result<()> {
        let key = fragment.document_key();
        let version = fragment.version.timestamp_millis();
        if self.seen.insert((key.clone(), version)) {
            self.deletes.push((key.clone(), version));
        }

        let (path, indices) = codec::encode(&fragment.path)?;
        self.inserts.push(PendingInsert {
            key,
            version,
            path,
            indices: codec::indices_to_blob(&indices),
            type_code: fragment.fragment_type.code(),
            value: fragment.value,
        });

        if self.inserts.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.deletes.is_empty() && self.inserts.is_empty() {
            return Ok(());
        }
        tracing::debug!(deletes = self.deletes.len(), inserts = self.inserts.len(), "flushing fragment batch");

        if !self.deletes.is_empty() {
            let mut stmt = self.conn.prepare_cached(DELETE_VERSION)?;
            for (key, version) in self.deletes.drain(..) {
                self.superseded += stmt.execute(params![key.namespace, key.entity, key.id, version])? as u64;
            }
        }

        let mut stmt = self.conn.prepare_cached(INSERT_FRAGMENT)?;
        for row in self.inserts.drain(..) {
            stmt.execute(params![
                row.key.namespace,
                row.key.entity,
                row.key.id,
                row.version,
                row.path,
                row.indices,
                row.type_code,
                row.value,
            ])?;
            self.inserted += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteSource;
    use chrono::Duration;

    fn t(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn frag(id: &str, version: DateTime<Utc>, path: &str, fragment_type: FragmentType, value: &str) -> Fragment {
        Fragment::new("ns", "person", id, version, path, fragment_type, Some(value.as_bytes().to_vec()))
    }

    fn alice(version: DateTime<Utc>) -> Vec<Fragment> {
        vec![
            frag("1", version, "/name", FragmentType::String, "Alice"),
            frag("1", version, "/age", FragmentType::Numeric, "30"),
        ]
    }

    fn paths(fragments: &[Fragment]) -> Vec<&str> {
        fragments.iter().map(|f| f.path.as_str()).collect()
    }

    fn row_count(tx: &Transaction<'_>) -> i64 {
        tx.connection()
            .query_row("SELECT COUNT(*) FROM fragment", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_write_then_read_orders_by_path() {
        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let store = FragmentStore::new(&tx);

        store.create_or_overwrite(alice(t(1))).unwrap();
        let fragments = store.read("ns", "person", "1", t(1)).collect_all().unwrap();
        assert_eq!(paths(&fragments), vec!["/age", "/name"]);
        assert_eq!(fragments[1].value_str(), Some("Alice"));
        assert_eq!(fragments[0].fragment_type, FragmentType::Numeric);
        assert_eq!(fragments[0].version, t(1));

        store.mark_deleted("ns", "person", "1", t(2)).unwrap();
        let deleted = store.read("ns", "person", "1", t(2)).collect_all().unwrap();
        assert_eq!(deleted.len(), 1);
        assert!(deleted[0].is_deleted_marker());
        assert_eq!(deleted[0].value, None);

        tx.commit().unwrap();
    }

    #[test]
    fn test_snapshot_monotonicity() {
        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let store = FragmentStore::new(&tx);

        store.create_or_overwrite(alice(t(10))).unwrap();
        store
            .create_or_overwrite([frag("1", t(20), "/name", FragmentType::String, "Alicia")])
            .unwrap();

        assert!(store.read("ns", "person", "1", t(9)).collect_all().unwrap().is_empty());

        let at_v1 = store.read("ns", "person", "1", t(15)).collect_all().unwrap();
        assert_eq!(at_v1, {
            let mut expected = alice(t(10));
            expected.reverse();
            expected
        });

        let at_v2 = store.read("ns", "person", "1", t(20)).collect_all().unwrap();
        assert_eq!(at_v2.len(), 1);
        assert_eq!(at_v2[0].value_str(), Some("Alicia"));
        assert_eq!(store.read("ns", "person", "1", t(1000)).collect_all().unwrap(), at_v2);
    }

    #[test]
    fn test_idempotent_overwrite() {
        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let store = FragmentStore::new(&tx);

        store.create_or_overwrite(alice(t(1))).unwrap();
        let first = store.read("ns", "person", "1", t(1)).collect_all().unwrap();
        store.create_or_overwrite(alice(t(1))).unwrap();
        let second = store.read("ns", "person", "1", t(1)).collect_all().unwrap();

        assert_eq!(first, second);
        assert_eq!(row_count(&tx), 2);
    }

    #[test]
    fn test_overwrite_replaces_whole_version() {
        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let store = FragmentStore::new(&tx);

        store.create_or_overwrite(alice(t(1))).unwrap();
        store
            .create_or_overwrite([frag("1", t(1), "/nick", FragmentType::String, "Al")])
            .unwrap();
        let fragments = store.read("ns", "person", "1", t(1)).collect_all().unwrap();
        assert_eq!(paths(&fragments), vec!["/nick"]);
    }

    #[test]
    fn test_batches_larger_than_batch_size() {
        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let options = StoreOptions { batch_size: 7, fetch_size: 3, ..StoreOptions::default() };
        let store = FragmentStore::with_options(&tx, options);

        let fragments = (0..50)
            .map(|i| frag("1", t(1), &format!("/tags[{}]", i), FragmentType::String, "x"))
            .collect::<Vec<_>>();
        store.create_or_overwrite(fragments.clone()).unwrap();
        store.create_or_overwrite(fragments).unwrap();

        let read = store.read("ns", "person", "1", t(1)).collect_all().unwrap();
        assert_eq!(read.len(), 50);
        let expected: Vec<String> = (0..50).map(|i| format!("/tags[{}]", i)).collect();
        assert_eq!(read.iter().map(|f| f.path.clone()).collect::<Vec<_>>(), expected);
        assert_eq!(tx.statistics().get("fragment.insert"), 100);
        assert_eq!(tx.statistics().get("fragment.supersede"), 50);
    }

    #[test]
    fn test_nonzero_offset_is_contract_violation() {
        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let store = FragmentStore::new(&tx);

        let mut bad = frag("1", t(1), "/name", FragmentType::String, "Alice");
        bad.offset = 8;
        let err = store.create_or_overwrite([bad]).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_write_failure_is_storage_error() {
        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let store = FragmentStore::new(&tx);

        // duplicate row within one revision violates the primary key
        let err = store
            .create_or_overwrite([
                frag("1", t(1), "/name", FragmentType::String, "a"),
                frag("1", t(1), "/name", FragmentType::String, "b"),
            ])
            .unwrap_err();
        assert!(err.is_storage_failure());
    }

    #[test]
    fn test_read_versions_includes_baseline() {
        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let store = FragmentStore::new(&tx);

        for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
            let v = t(10 * (i as i64 + 1));
            store.create_or_overwrite([frag("1", v, "/name", FragmentType::String, name)]).unwrap();
        }

        let versions = |range: Range<DateTime<Utc>>| {
            store
                .read_versions("ns", "person", "1", &range)
                .collect_all()
                .unwrap()
                .into_iter()
                .map(|f| f.value_str().unwrap_or_default().to_string())
                .collect::<Vec<_>>()
        };

        assert_eq!(versions(Range::between(t(25), t(40))), vec!["b", "c"]);
        assert_eq!(versions(Range::between(t(20), t(40))), vec!["b", "c"]);
        assert_eq!(versions(Range::between(t(5), t(25))), vec!["a", "b"]);
        assert_eq!(versions(Range::unbounded()), vec!["a", "b", "c", "d"]);
        assert_eq!(versions(Range::unbounded().with_limit(2)), vec!["a", "b"]);
    }

    #[test]
    fn test_read_versions_observes_tombstone() {
        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let store = FragmentStore::new(&tx);

        store.create_or_overwrite(alice(t(1))).unwrap();
        store.mark_deleted("ns", "person", "1", t(2)).unwrap();
        let history = store.read_versions("ns", "person", "1", &Range::unbounded()).collect_all().unwrap();
        assert_eq!(history.len(), 3);
        assert!(history[2].is_deleted_marker());
    }

    fn seed_people(store: &FragmentStore<'_>) {
        for id in ["1", "2", "3", "4"] {
            store
                .create_or_overwrite([
                    frag(id, t(1), "/city", FragmentType::String, "Oslo"),
                    frag(id, t(1), "/name", FragmentType::String, &format!("p{}", id)),
                ])
                .unwrap();
        }
        // person 2 moves away later
        store
            .create_or_overwrite([frag("2", t(5), "/city", FragmentType::String, "Bergen")])
            .unwrap();
    }

    #[test]
    fn test_read_all_pages_by_id() {
        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let store = FragmentStore::new(&tx);
        seed_people(&store);

        let all = store.read_all("ns", "person", t(10), &Range::unbounded()).collect_all().unwrap();
        let ids: Vec<&str> = all.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "1", "2", "3", "3", "4", "4"]);

        let middle = store
            .read_all("ns", "person", t(10), &Range::between("1".to_string(), "4".to_string()))
            .collect_all()
            .unwrap();
        assert!(middle.iter().all(|f| f.id == "2" || f.id == "3"));

        let first_rows = store.read_all("ns", "person", t(10), &Range::first(3)).collect_all().unwrap();
        assert_eq!(first_rows.len(), 3);
    }

    #[test]
    fn test_find_matches_snapshot_version_only() {
        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let store = FragmentStore::new(&tx);
        seed_people(&store);

        let ids = |snapshot, range: &Range<String>| {
            let mut ids: Vec<String> = store
                .find("ns", "person", snapshot, "/city", b"Oslo", range)
                .unwrap()
                .collect_all()
                .unwrap()
                .into_iter()
                .map(|f| f.id)
                .collect();
            ids.dedup();
            ids
        };

        assert_eq!(ids(t(2), &Range::unbounded()), vec!["1", "2", "3", "4"]);
        assert_eq!(ids(t(10), &Range::unbounded()), vec!["1", "3", "4"]);
        assert_eq!(ids(t(10), &Range::first(2)), vec!["1", "3"]);
        assert_eq!(ids(t(10), &Range::first_after(5, "1".to_string())), vec!["3", "4"]);
    }

    #[test]
    fn test_find_with_array_paths() {
        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let store = FragmentStore::new(&tx);
        store
            .create_or_overwrite([
                frag("1", t(1), "/tags[0]", FragmentType::String, "red"),
                frag("1", t(1), "/tags[1]", FragmentType::String, "blue"),
                frag("2", t(1), "/tags[0]", FragmentType::String, "blue"),
            ])
            .unwrap();

        let found = |path: &str| {
            let mut ids: Vec<String> = store
                .find("ns", "person", t(1), path, b"blue", &Range::unbounded())
                .unwrap()
                .collect_all()
                .unwrap()
                .into_iter()
                .map(|f| f.id)
                .collect();
            ids.dedup();
            ids
        };

        assert_eq!(found("/tags[0]"), vec!["2"]);
        assert_eq!(found("/tags[1]"), vec!["1"]);
        assert_eq!(found("/tags[]"), vec!["1", "2"]);
    }

    #[test]
    fn test_find_with_mixed_index_paths() {
        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let store = FragmentStore::new(&tx);
        store
            .create_or_overwrite([
                frag("1", t(1), "/a[1]/b[0]", FragmentType::String, "blue"),
                frag("2", t(1), "/a[0]/b[1]", FragmentType::String, "blue"),
                frag("3", t(1), "/a[1]/b[1]", FragmentType::String, "red"),
            ])
            .unwrap();

        let found = |path: &str| {
            let mut ids: Vec<String> = store
                .find("ns", "person", t(1), path, b"blue", &Range::unbounded())
                .unwrap()
                .collect_all()
                .unwrap()
                .into_iter()
                .map(|f| f.id)
                .collect();
            ids.dedup();
            ids
        };

        assert_eq!(found("/a[1]/b[]"), vec!["1"]);
        assert_eq!(found("/a[]/b[1]"), vec!["2"]);
        assert_eq!(found("/a[0]/b[]"), vec!["2"]);
        assert_eq!(found("/a[]/b[]"), vec!["1", "2"]);
        assert!(found("/a[2]/b[]").is_empty());
    }

    #[test]
    fn test_has_previous_and_next() {
        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let store = FragmentStore::new(&tx);
        seed_people(&store);

        assert!(!store.has_previous("ns", "person", "1", t(10)).unwrap());
        assert!(store.has_next("ns", "person", "1", t(10)).unwrap());
        assert!(store.has_previous("ns", "person", "4", t(10)).unwrap());
        assert!(!store.has_next("ns", "person", "4", t(10)).unwrap());
        assert!(!store.has_next("ns", "person", "1", t(0)).unwrap());
    }

    #[test]
    fn test_delete_variants() {
        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let store = FragmentStore::new(&tx);

        store.create_or_overwrite(alice(t(1))).unwrap();
        store.create_or_overwrite(alice(t(2))).unwrap();

        assert_eq!(store.delete("ns", "person", "1", t(2)).unwrap(), 2);
        let current = store.read("ns", "person", "1", t(5)).collect_all().unwrap();
        assert_eq!(current[0].version, t(1));

        assert_eq!(store.delete_all_versions("ns", "person", "1").unwrap(), 2);
        assert!(store.read("ns", "person", "1", t(5)).collect_all().unwrap().is_empty());
        assert_eq!(row_count(&tx), 0);
    }

    #[test]
    fn test_streaming_read_is_lazy_and_cancellable() {
        use crate::stream::{Demand, Subscriber};

        #[derive(Default)]
        struct Collect {
            paths: Vec<String>,
            done: bool,
        }

        impl Subscriber<Fragment> for Collect {
            fn on_next(&mut self, item: Fragment, _demand: &Demand) {
                self.paths.push(item.path);
            }

            fn on_complete(&mut self) {
                self.done = true;
            }

            fn on_error(&mut self, error: Error) {
                panic!("unexpected stream failure: {}", error);
            }
        }

        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let options = StoreOptions { fetch_size: 2, ..StoreOptions::default() };
        let store = FragmentStore::with_options(&tx, options);
        let fragments = (0..5)
            .map(|i| frag("1", t(1), &format!("/n[{}]", i), FragmentType::Numeric, "1"))
            .collect::<Vec<_>>();

        // a stream created before the write observes it: nothing ran yet
        let stream = store.read("ns", "person", "1", t(1));
        store.create_or_overwrite(fragments).unwrap();

        let mut sub = stream.subscribe(Collect::default());
        sub.request(3);
        assert_eq!(sub.subscriber().paths, vec!["/n[0]", "/n[1]", "/n[2]"]);
        sub.cancel();
        sub.request(10);
        assert_eq!(sub.subscriber().paths.len(), 3);
        assert!(!sub.subscriber().done);
    }

    /// Counts items and terminal signals
    #[derive(Default)]
    struct Tally {
        items: usize,
        completed: bool,
    }

    impl crate::stream::Subscriber<Fragment> for Tally {
        fn on_next(&mut self, _item: Fragment, _demand: &crate::stream::Demand) {
            self.items += 1;
        }

        fn on_complete(&mut self) {
            self.completed = true;
        }

        fn on_error(&mut self, error: Error) {
            panic!("unexpected stream failure: {}", error);
        }
    }

    fn numbered(count: usize) -> Vec<Fragment> {
        (0..count)
            .map(|i| frag("1", t(1), &format!("/n[{}]", i), FragmentType::Numeric, "1"))
            .collect()
    }

    #[test]
    fn test_exact_demand_completes_on_page_boundary() {
        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let store = FragmentStore::new(&tx);
        store.create_or_overwrite(numbered(10)).unwrap();

        let mut sub = store.read("ns", "person", "1", t(1)).subscribe(Tally::default());
        sub.request(10);
        assert_eq!(sub.subscriber().items, 10);
        assert!(sub.subscriber().completed);
        assert!(sub.is_terminated());
    }

    #[test]
    fn test_exact_demand_completes_across_pages() {
        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let options = StoreOptions { fetch_size: 4, ..StoreOptions::default() };
        let store = FragmentStore::with_options(&tx, options);
        store.create_or_overwrite(numbered(12)).unwrap();

        let mut sub = store.read("ns", "person", "1", t(1)).subscribe(Tally::default());
        sub.request(5);
        assert_eq!(sub.subscriber().items, 5);
        assert!(!sub.subscriber().completed);
        sub.request(7);
        assert_eq!(sub.subscriber().items, 12);
        assert!(sub.subscriber().completed);
    }

    #[test]
    fn test_paging_survives_writes_between_pages() {
        let source = SqliteSource::open_in_memory().unwrap();
        let tx = source.begin().unwrap();
        let options = StoreOptions { fetch_size: 1, ..StoreOptions::default() };
        let store = FragmentStore::with_options(&tx, options);
        for id in ["1", "2", "3", "4", "5"] {
            store.create_or_overwrite([frag(id, t(1), "/name", FragmentType::String, id)]).unwrap();
        }

        let mut rows = store.read_all("ns", "person", t(1), &Range::unbounded()).into_iter();
        let mut ids = Vec::new();
        for _ in 0..2 {
            ids.push(rows.next().unwrap().unwrap().id);
        }
        store.delete_all_versions("ns", "person", "1").unwrap();
        for row in rows {
            ids.push(row.unwrap().id);
        }
        assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);
    }
}
