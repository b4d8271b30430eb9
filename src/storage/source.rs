//! Session acquisition and schema bootstrap

use super::schema;
use super::transaction::Transaction;
use crate::config::FragstoreConfig;
use crate::{Error, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Hands out transactional database sessions.
pub trait ConnectionSource {
    /// Acquire a session for the exclusive use of one transaction
    fn acquire(&self) -> Result<Connection>;

    /// Return a session acquired from this source
    fn release(&self, conn: Connection);
}

/// Idempotently ensures the engine's tables exist.
pub trait SchemaBootstrap {
    fn ensure_schema(&self, conn: &Connection) -> Result<()>;
}

/// SQLite-backed session source with a small idle pool.
///
/// An in-memory database lives in a single connection, so it serves one
/// session at a time.
pub struct SqliteSource {
    database: Option<PathBuf>,
    idle: Mutex<Vec<Connection>>,
    max_idle: usize,
}

impl SqliteSource {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        Self::with_database(Some(path.to_path_buf()))
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::with_database(None)
    }

    pub fn from_config(config: &FragstoreConfig) -> Result<Self> {
        Self::with_database(config.database.clone())
    }

    fn with_database(database: Option<PathBuf>) -> Result<Self> {
        let source = Self {
            database,
            idle: Mutex::new(Vec::new()),
            max_idle: 4,
        };
        let conn = source.connect()?;
        source.ensure_schema(&conn)?;
        source.release(conn);
        Ok(source)
    }

    pub fn is_in_memory(&self) -> bool {
        self.database.is_none()
    }

    /// Begin a transaction on a fresh session from this source
    pub fn begin(&self) -> Result<Transaction<'_>> {
        Transaction::begin(self, false)
    }

    /// Begin a transaction that rejects writes
    pub fn begin_read_only(&self) -> Result<Transaction<'_>> {
        Transaction::begin(self, true)
    }

    fn connect(&self) -> Result<Connection> {
        let conn = match &self.database {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        tracing::debug!(database = ?self.database, "opened sqlite session");
        Ok(conn)
    }

    fn idle(&self) -> MutexGuard<'_, Vec<Connection>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ConnectionSource for SqliteSource {
    fn acquire(&self) -> Result<Connection> {
        if let Some(conn) = self.idle().pop() {
            return Ok(conn);
        }
        if self.is_in_memory() {
            return Err(Error::SessionUnavailable(
                "the in-memory database is held by another transaction".to_string(),
            ));
        }
        self.connect()
    }

    fn release(&self, conn: Connection) {
        let mut idle = self.idle();
        if idle.len() < self.max_idle || self.is_in_memory() {
            idle.push(conn);
        }
    }
}

impl SchemaBootstrap for SqliteSource {
    fn ensure_schema(&self, conn: &Connection) -> Result<()> {
        for stmt in schema::all_schema_statements() {
            conn.execute(stmt, [])?;
        }
        Ok(())
    }
}
