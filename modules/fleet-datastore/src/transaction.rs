//! Explicit transaction handle passed to write operations.
//!
//! A write given `Some(&mut tx)` runs inside `tx` and stays invisible to other
//! connections until [`Transaction::commit`]. Both finalizers consume the
//! handle. Dropping an unfinished handle rolls it back.

use sqlx::{PgConnection, Postgres};
use tracing::{debug, info};

use crate::error::{DatastoreError, Result};

pub struct Transaction {
    inner: sqlx::Transaction<'static, Postgres>,
    writes: usize,
}

impl Transaction {
    pub(crate) fn new(inner: sqlx::Transaction<'static, Postgres>) -> Self {
        Self { inner, writes: 0 }
    }

    /// Connection for the next statement issued under this transaction.
    pub(crate) fn conn(&mut self) -> &mut PgConnection {
        &mut *self.inner
    }

    pub(crate) fn record_write(&mut self) {
        self.writes += 1;
    }

    /// Number of write operations issued under this transaction so far.
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Durably apply every write issued under this transaction.
    pub async fn commit(self) -> Result<()> {
        let writes = self.writes;
        self.inner
            .commit()
            .await
            .map_err(DatastoreError::Transaction)?;
        info!(writes, "Transaction committed");
        Ok(())
    }

    /// Discard every write issued under this transaction.
    pub async fn rollback(self) -> Result<()> {
        let writes = self.writes;
        self.inner
            .rollback()
            .await
            .map_err(DatastoreError::Transaction)?;
        debug!(writes, "Transaction rolled back");
        Ok(())
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("writes", &self.writes)
            .finish_non_exhaustive()
    }
}
