//! Database schema definitions

/// SQL to create the fragment table.
///
/// `indices` holds big-endian u32 values so that blob comparison orders
/// rows like an integer array would.
pub const CREATE_FRAGMENT_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS fragment (
    namespace TEXT NOT NULL,
    entity TEXT NOT NULL,
    id TEXT NOT NULL,
    version INTEGER NOT NULL,
    path TEXT NOT NULL,
    indices BLOB NOT NULL,
    type INTEGER NOT NULL,
    value BLOB,
    PRIMARY KEY (namespace, entity, id, version, path, indices, type)
)
"#;

/// SQL to create the vertex table
pub const CREATE_VERTEX_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS vertex (
    namespace TEXT NOT NULL,
    entity TEXT NOT NULL,
    id TEXT NOT NULL,
    valid INTEGER NOT NULL,
    uri TEXT NOT NULL,
    data TEXT,
    PRIMARY KEY (namespace, entity, id)
)
"#;

/// SQL to create the edge table. Both ends reference `vertex`.
pub const CREATE_EDGE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS edge (
    vertex_to_namespace TEXT NOT NULL,
    vertex_to_entity TEXT NOT NULL,
    vertex_to_id TEXT NOT NULL,
    vertex_from_relationship_uri TEXT NOT NULL,
    vertex_from_label TEXT NOT NULL,
    vertex_from_namespace TEXT NOT NULL,
    vertex_from_entity TEXT NOT NULL,
    vertex_from_id TEXT NOT NULL,
    PRIMARY KEY (vertex_to_namespace, vertex_to_entity, vertex_to_id, vertex_from_relationship_uri),
    FOREIGN KEY (vertex_to_namespace, vertex_to_entity, vertex_to_id)
        REFERENCES vertex (namespace, entity, id),
    FOREIGN KEY (vertex_from_namespace, vertex_from_entity, vertex_from_id)
        REFERENCES vertex (namespace, entity, id)
)
"#;

/// SQL to create indexes
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_fragment_path_value ON fragment(namespace, entity, path, value)",
    "CREATE INDEX IF NOT EXISTS idx_vertex_valid ON vertex(namespace, entity, valid)",
    "CREATE INDEX IF NOT EXISTS idx_edge_from ON edge(vertex_from_namespace, vertex_from_entity, vertex_from_id)",
];

/// All schema creation statements
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut stmts = vec![
        CREATE_FRAGMENT_TABLE,
        CREATE_VERTEX_TABLE,
        CREATE_EDGE_TABLE,
    ];
    stmts.extend(CREATE_INDEXES.iter().copied());
    stmts
}
