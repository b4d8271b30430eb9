//! Transaction Wrapper - one session bound to one logical operation

use super::source::ConnectionSource;
use crate::Result;
use rusqlite::Connection;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;

/// Per-transaction operation counters, returned on commit or cancel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionStatistics {
    counts: BTreeMap<&'static str, u64>,
}

impl TransactionStatistics {
    pub fn add(&mut self, key: &'static str, n: u64) {
        *self.counts.entry(key).or_default() += n;
    }

    pub fn get(&self, key: &str) -> u64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        self.counts.iter().map(|(k, v)| (*k, *v))
    }
}

impl fmt::Display for TransactionStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Transaction Statistics:")?;
        for (key, count) in self.iter() {
            writeln!(f, "  {}: {}", key, count)?;
        }
        Ok(())
    }
}

/// Exclusive owner of one database session.
///
/// The session is released exactly once: by [`Transaction::commit`],
/// [`Transaction::cancel`], or by `Drop`, which rolls back.
pub struct Transaction<'s> {
    source: &'s dyn ConnectionSource,
    conn: Option<Connection>,
    read_only: bool,
    statistics: RefCell<TransactionStatistics>,
}

impl<'s> Transaction<'s> {
    pub fn begin(source: &'s dyn ConnectionSource, read_only: bool) -> Result<Self> {
        let conn = source.acquire()?;
        let setup = if read_only {
            "PRAGMA query_only = ON; BEGIN DEFERRED;"
        } else {
            "BEGIN DEFERRED;"
        };
        if let Err(e) = conn.execute_batch(setup) {
            let _ = conn.execute_batch("PRAGMA query_only = OFF;");
            source.release(conn);
            return Err(e.into());
        }
        Ok(Self {
            source,
            conn: Some(conn),
            read_only,
            statistics: RefCell::new(TransactionStatistics::default()),
        })
    }

    /// The session owned by this transaction
    pub fn connection(&self) -> &Connection {
        self.conn.as_ref().expect("session is held until commit or cancel")
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn record(&self, key: &'static str, n: u64) {
        if n > 0 {
            self.statistics.borrow_mut().add(key, n);
        }
    }

    pub fn statistics(&self) -> TransactionStatistics {
        self.statistics.borrow().clone()
    }

    pub fn commit(mut self) -> Result<TransactionStatistics> {
        self.finish(true)
    }

    pub fn cancel(mut self) -> Result<TransactionStatistics> {
        self.finish(false)
    }

    fn finish(&mut self, commit: bool) -> Result<TransactionStatistics> {
        let Some(conn) = self.conn.take() else {
            return Ok(self.statistics());
        };

        let outcome = if commit {
            conn.execute_batch("COMMIT;").map_err(|e| {
                let _ = conn.execute_batch("ROLLBACK;");
                e
            })
        } else {
            conn.execute_batch("ROLLBACK;")
        };
        if self.read_only {
            let _ = conn.execute_batch("PRAGMA query_only = OFF;");
        }
        self.source.release(conn);

        outcome?;
        let statistics = self.statistics();
        tracing::debug!(commit, "transaction finished\n{}", statistics);
        Ok(statistics)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.conn.is_some() {
            tracing::warn!("transaction dropped without commit or cancel, rolling back");
            if let Err(e) = self.finish(false) {
                tracing::warn!("rollback on drop failed: {}", e);
            }
        }
    }
}
