//! Grouped writes under a single hold of the write lock.

use crate::database::Database;
use crate::entry::Entry;
use crate::error::CoreResult;
use crate::table::Table;
use shelfdb_codec::Value;

/// Write handle passed to the closure of [`Database::batch`].
///
/// No other writer can interleave with the writes made through a batch.
/// Reads from other threads may still observe the writes one at a time,
/// and there is no rollback: writes applied before an error stay applied.
pub struct Batch<'db> {
    db: &'db Database,
    writes: usize,
    sync_requested: bool,
}

impl<'db> Batch<'db> {
    pub(crate) fn new(db: &'db Database) -> Self {
        Self {
            db,
            writes: 0,
            sync_requested: false,
        }
    }

    fn table(&self, name: &str) -> CoreResult<Table<'db>> {
        self.db.table(name)
    }

    /// Stores `value` under `table.key`.
    ///
    /// # Errors
    ///
    /// See [`Table::set`].
    pub fn set(&mut self, table: &str, key: impl ToString, value: impl Into<Value>) -> CoreResult<()> {
        self.table(table)?.set(key, value)?;
        self.writes += 1;
        Ok(())
    }

    /// Stores `value` under `table.key` and asks for a sync once the batch ends.
    ///
    /// # Errors
    ///
    /// See [`Table::set`].
    pub fn set_with_sync(
        &mut self,
        table: &str,
        key: impl ToString,
        value: impl Into<Value>,
    ) -> CoreResult<()> {
        self.set(table, key, value)?;
        self.sync_requested = true;
        Ok(())
    }

    /// Merges `obj` into the entry under `table.key`.
    ///
    /// # Errors
    ///
    /// See [`Table::update`].
    pub fn update(
        &mut self,
        table: &str,
        key: impl ToString,
        obj: impl Into<Value>,
    ) -> CoreResult<Entry> {
        let merged = self.table(table)?.update(key, obj)?;
        self.writes += 1;
        Ok(merged)
    }

    /// Read-modify-write of the entry under `table.key`.
    ///
    /// # Errors
    ///
    /// See [`Table::modify`].
    pub fn modify<F, R>(&mut self, table: &str, key: impl ToString, f: F) -> CoreResult<R>
    where
        F: FnOnce(&mut Entry) -> R,
    {
        let value = self.table(table)?.modify(key, f)?;
        self.writes += 1;
        Ok(value)
    }

    /// Deletes `table.key`. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// See [`Table::delete`].
    pub fn delete(&mut self, table: &str, key: impl ToString) -> CoreResult<bool> {
        let existed = self.table(table)?.delete(key)?;
        self.writes += 1;
        Ok(existed)
    }

    /// Reads the entry under `table.key`, seeing this batch's own writes.
    ///
    /// # Errors
    ///
    /// See [`Table::get`].
    pub fn get(&self, table: &str, key: impl ToString) -> CoreResult<Entry> {
        self.table(table)?.get(key)
    }

    /// Asks for a sync once the batch ends.
    pub fn request_sync(&mut self) {
        self.sync_requested = true;
    }

    /// Number of writes made so far.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub(crate) fn sync_requested(&self) -> bool {
        self.sync_requested
    }
}
