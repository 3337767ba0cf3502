//! Database facade.

use crate::batch::Batch;
use crate::config::Config;
use crate::entry::Entry;
use crate::error::{CoreError, CoreResult};
use crate::index::{FieldIndex, IndexRegistry, IndexStats};
use crate::store::Store;
use crate::table::Table;
use parking_lot::{ReentrantMutex, RwLock};
use shelfdb_codec::Value;
use shelfdb_storage::{
    join_key, open_backend, split_key, Backend, BackendKind, InMemoryBackend, KEY_SEPARATOR,
};
use std::collections::BTreeSet;
use std::path::Path;

/// The main database handle.
///
/// A `Database` owns one storage backend and hands out [`Table`] handles
/// that borrow it. Records are [`Entry`] mappings addressed by table name
/// and key.
///
/// # Opening a Database
///
/// ```rust,no_run
/// use shelfdb_core::{entry, Database};
///
/// // Opens or creates `inventory.sdb`
/// let db = Database::open("inventory")?;
///
/// let items = db.table("items")?;
/// items.set("widget", entry! { "count" => 3 })?;
///
/// db.close()?;
/// # Ok::<(), shelfdb_core::CoreError>(())
/// ```
///
/// # Concurrency
///
/// `Database` is `Send + Sync`. Every mutation, sync, backup and index
/// build runs under one write lock, so writes are serialized while reads
/// proceed concurrently. The write lock is reentrant: a thread already
/// holding it (inside [`Database::batch`], say) may write again.
pub struct Database {
    /// Configuration.
    config: Config,
    /// Serializes all writers.
    write_lock: ReentrantMutex<()>,
    /// Backend plus pending writes.
    store: RwLock<Store>,
    /// Field indexes.
    indexes: RwLock<IndexRegistry>,
    /// Known table names.
    tables: RwLock<BTreeSet<String>>,
    /// Whether the database is open.
    is_open: RwLock<bool>,
}

impl Database {
    /// Opens a database with the default configuration.
    ///
    /// `name` is the storage base name; the backend appends its own suffix
    /// (`.sdb` for the default file backend).
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be opened or is locked by
    /// another handle.
    pub fn open(name: impl AsRef<Path>) -> CoreResult<Self> {
        Self::open_with_config(name, Config::default())
    }

    /// Opens a database with a custom configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be opened in `config.mode`.
    pub fn open_with_config(name: impl AsRef<Path>, config: Config) -> CoreResult<Self> {
        let backend = open_backend(config.backend, name.as_ref(), config.mode)?;
        Self::open_with_backend(config, backend)
    }

    /// Wraps an already opened backend.
    ///
    /// The backend takes the place of `config.backend` and `config.mode`;
    /// only the writeback and serialization settings apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend's keys cannot be listed.
    pub fn open_with_backend(config: Config, backend: Box<dyn Backend>) -> CoreResult<Self> {
        let serialize = config
            .serialize
            .unwrap_or_else(|| backend.needs_serialization());

        let mut tables = BTreeSet::new();
        for composite in backend.keys()? {
            match split_key(&composite) {
                Ok((table, _)) => {
                    tables.insert(table.to_string());
                }
                Err(e) => tracing::warn!(key = %composite, error = %e, "skipping malformed key"),
            }
        }

        tracing::debug!(
            backend = %backend.describe(),
            tables = tables.len(),
            writeback = config.writeback,
            serialize,
            "opened database"
        );

        Ok(Self {
            config,
            write_lock: ReentrantMutex::new(()),
            store: RwLock::new(Store::new(backend, config.writeback, serialize)),
            indexes: RwLock::new(IndexRegistry::new()),
            tables: RwLock::new(tables),
            is_open: RwLock::new(true),
        })
    }

    /// Opens a database that lives only in memory.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature matches the other constructors.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_backend(
            Config::new().backend(BackendKind::InMemory),
            Box::new(InMemoryBackend::new()),
        )
    }

    // ========================================================================
    // Tables
    // ========================================================================

    /// Returns a handle to table `name`, registering it if new.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidTableName`] if `name` is empty or contains
    /// `.`, or [`CoreError::DatabaseClosed`].
    pub fn table(&self, name: &str) -> CoreResult<Table<'_>> {
        self.ensure_open()?;
        validate_table_name(name)?;
        self.register_table(name);
        Ok(Table::new(self, name.to_string()))
    }

    /// Handles to every known table, ordered by name.
    #[must_use]
    pub fn tables(&self) -> Vec<Table<'_>> {
        self.table_names()
            .into_iter()
            .map(|name| Table::new(self, name))
            .collect()
    }

    /// Names of every known table, in ascending order.
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        self.tables.read().iter().cloned().collect()
    }

    /// Runs `f` with the write lock held for its whole duration.
    ///
    /// Sync requests made through the [`Batch`] are carried out once, after
    /// `f` returns successfully.
    ///
    /// # Errors
    ///
    /// Returns the first error from `f`, or from the deferred sync.
    pub fn batch<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Batch<'_>) -> CoreResult<T>,
    {
        let _guard = self.write_lock.lock();
        self.ensure_open()?;
        let mut batch = Batch::new(self);
        let value = f(&mut batch)?;
        if batch.sync_requested() {
            self.store.write().sync()?;
        }
        Ok(value)
    }

    // ========================================================================
    // Raw access
    // ========================================================================

    /// Reads the entry at a composite `table.key`, or an empty one.
    ///
    /// # Errors
    ///
    /// Returns an error if the key has no table part or the record is
    /// unreadable.
    pub fn raw_get(&self, composite: &str) -> CoreResult<Entry> {
        let (table, key) = split_key(composite)?;
        Ok(self.load_entry(table, key)?.unwrap_or_default())
    }

    /// Writes the entry at a composite `table.key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key has no table part or `value` is not a
    /// mapping.
    pub fn raw_set(&self, composite: &str, value: impl Into<Value>) -> CoreResult<()> {
        let (table, key) = split_key(composite)?;
        validate_table_name(table)?;
        let entry = Entry::try_from(value.into())?;
        self.write_entry(table, key, entry, false)
    }

    /// Deletes the entry at a composite `table.key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key has no table part or the write fails.
    pub fn raw_delete(&self, composite: &str) -> CoreResult<bool> {
        let (table, key) = split_key(composite)?;
        self.delete_entry(table, key)
    }

    /// Every composite key, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is closed.
    pub fn raw_keys(&self) -> CoreResult<Vec<String>> {
        self.ensure_open()?;
        self.store.read().keys_with_prefix("")
    }

    /// Number of writes waiting in the writeback cache.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.store.read().pending()
    }

    // ========================================================================
    // Durability and lifecycle
    // ========================================================================

    /// Writes all pending writes to the backend and syncs it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is closed or a write fails.
    pub fn sync(&self) -> CoreResult<()> {
        let _guard = self.write_lock.lock();
        self.ensure_open()?;
        self.store.write().sync()
    }

    /// Syncs, then asks the backend to reclaim space held by overwritten
    /// and deleted records.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is closed or the rewrite fails.
    pub fn compact(&self) -> CoreResult<()> {
        let _guard = self.write_lock.lock();
        self.ensure_open()?;
        let mut store = self.store.write();
        store.compact()?;
        tracing::info!(backend = %store.backend().describe(), "compacted");
        Ok(())
    }

    /// Flushes pending writes and closes the backend.
    ///
    /// Closing twice is a no-op. Afterwards every operation fails with
    /// [`CoreError::DatabaseClosed`].
    ///
    /// # Errors
    ///
    /// Returns the first error from flushing or closing the backend. The
    /// database counts as closed either way.
    pub fn close(&self) -> CoreResult<()> {
        let _guard = self.write_lock.lock();
        {
            let mut is_open = self.is_open.write();
            if !*is_open {
                return Ok(());
            }
            *is_open = false;
        }
        let result = self.store.write().close();
        self.indexes.write().clear();
        tracing::debug!(ok = result.is_ok(), "closed database");
        result
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    /// Returns database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether writes are cached until sync.
    #[must_use]
    pub fn is_writeback(&self) -> bool {
        self.store.read().is_writeback()
    }

    /// Whether entries are stored as encoded bytes.
    #[must_use]
    pub fn serializes(&self) -> bool {
        self.store.read().serializes()
    }

    /// Whether the backend rejects writes.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.store.read().backend().is_read_only()
    }

    /// Human-readable description of the backend.
    #[must_use]
    pub fn describe(&self) -> String {
        self.store.read().backend().describe()
    }

    // ========================================================================
    // Indexes
    // ========================================================================

    /// Sizes of the indexes built so far.
    #[must_use]
    pub fn index_stats(&self) -> Vec<IndexStats> {
        self.indexes.read().stats()
    }

    /// Discards every index. They are rebuilt on the next query.
    pub fn drop_indexes(&self) {
        let _guard = self.write_lock.lock();
        self.indexes.write().clear();
    }

    /// Runs `f` against the index on `table.field`, building it first if
    /// needed.
    pub(crate) fn with_index<F, R>(&self, table: &str, field: &str, f: F) -> CoreResult<R>
    where
        F: FnOnce(&FieldIndex) -> R,
    {
        self.ensure_open()?;
        {
            let indexes = self.indexes.read();
            if let Some(index) = indexes.get(table, field) {
                return Ok(f(index));
            }
        }

        let _guard = self.write_lock.lock();
        self.ensure_open()?;
        let entries = if self.indexes.read().contains(table, field) {
            Vec::new()
        } else {
            self.scan_table(table)?
        };
        let mut indexes = self.indexes.write();
        let index = indexes.get_or_build(table, field, || {
            let index = FieldIndex::build(field, entries.iter().map(|(k, e)| (k.clone(), e)))?;
            tracing::debug!(
                table,
                field,
                keys = index.len(),
                distinct = index.distinct_values(),
                "built index"
            );
            Ok(index)
        })?;
        Ok(f(index))
    }

    // ========================================================================
    // Entry plumbing shared by tables, results and batches
    // ========================================================================

    pub(crate) fn load_entry(&self, table: &str, key: &str) -> CoreResult<Option<Entry>> {
        self.ensure_open()?;
        self.store.read().load(&join_key(table, key))
    }

    pub(crate) fn contains_entry(&self, table: &str, key: &str) -> CoreResult<bool> {
        self.ensure_open()?;
        self.store.read().contains(&join_key(table, key))
    }

    pub(crate) fn table_keys(&self, table: &str) -> CoreResult<Vec<String>> {
        self.ensure_open()?;
        let prefix = join_key(table, "");
        let keys = self.store.read().keys_with_prefix(&prefix)?;
        Ok(keys
            .into_iter()
            .map(|composite| composite[prefix.len()..].to_string())
            .collect())
    }

    /// Every `(key, entry)` pair of `table`, read under one store lock.
    pub(crate) fn scan_table(&self, table: &str) -> CoreResult<Vec<(String, Entry)>> {
        self.ensure_open()?;
        let prefix = join_key(table, "");
        let store = self.store.read();
        let mut entries = Vec::new();
        for composite in store.keys_with_prefix(&prefix)? {
            if let Some(entry) = store.load(&composite)? {
                entries.push((composite[prefix.len()..].to_string(), entry));
            }
        }
        Ok(entries)
    }

    pub(crate) fn write_entry(
        &self,
        table: &str,
        key: &str,
        entry: Entry,
        sync: bool,
    ) -> CoreResult<()> {
        let _guard = self.write_lock.lock();
        self.put_locked(table, key, entry)?;
        if sync {
            self.sync_key_locked(table, key)?;
        }
        Ok(())
    }

    pub(crate) fn modify_entry<F, R>(&self, table: &str, key: &str, f: F) -> CoreResult<R>
    where
        F: FnOnce(&mut Entry) -> R,
    {
        let _guard = self.write_lock.lock();
        let mut entry = self.load_entry(table, key)?.unwrap_or_default();
        let value = f(&mut entry);
        self.put_locked(table, key, entry)?;
        Ok(value)
    }

    pub(crate) fn delete_entry(&self, table: &str, key: &str) -> CoreResult<bool> {
        let _guard = self.write_lock.lock();
        self.ensure_open()?;
        let mut store = self.store.write();
        let existed = store.remove(&join_key(table, key))?;
        if existed {
            self.indexes.write().on_write(table, key, None)?;
        }
        Ok(existed)
    }

    pub(crate) fn sync_table(&self, table: &str) -> CoreResult<()> {
        let _guard = self.write_lock.lock();
        self.ensure_open()?;
        self.store.write().sync_prefix(&join_key(table, ""))
    }

    /// Applies a put to the store, then to the indexes. Caller holds the
    /// write lock.
    fn put_locked(&self, table: &str, key: &str, entry: Entry) -> CoreResult<()> {
        self.ensure_open()?;
        self.register_table(table);
        let mut store = self.store.write();
        let stored = store.put(join_key(table, key), entry)?;
        self.indexes.write().on_write(table, key, Some(&stored))
    }

    /// Caller holds the write lock.
    pub(crate) fn sync_key_locked(&self, table: &str, key: &str) -> CoreResult<()> {
        self.store.write().sync_key(&join_key(table, key))
    }

    fn register_table(&self, name: &str) {
        if !self.tables.read().contains(name) {
            self.tables.write().insert(name.to_string());
        }
    }

    /// Ensures the database is open.
    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }

    pub(crate) fn write_guard(&self) -> parking_lot::ReentrantMutexGuard<'_, ()> {
        self.write_lock.lock()
    }

    pub(crate) fn store(&self) -> &RwLock<Store> {
        &self.store
    }
}

fn validate_table_name(name: &str) -> CoreResult<()> {
    if name.is_empty() || name.contains(KEY_SEPARATOR) {
        return Err(CoreError::InvalidTableName {
            name: name.to_string(),
        });
    }
    Ok(())
}

impl<'db> IntoIterator for &'db Database {
    type Item = Table<'db>;
    type IntoIter = std::vec::IntoIter<Table<'db>>;

    fn into_iter(self) -> Self::IntoIter {
        self.tables().into_iter()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("is_open", &self.is_open())
            .field("backend", &self.describe())
            .field("tables", &self.table_names())
            .field("pending_writes", &self.pending_writes())
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "failed to close database on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry;
    use shelfdb_storage::{OpenMode, StorageError};
    use tempfile::tempdir;

    fn create_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn open_in_memory() {
        let db = create_db();
        assert!(db.is_open());
        assert!(!db.is_writeback());
        assert!(!db.serializes());
        assert_eq!(db.describe(), "memory");
    }

    #[test]
    fn table_names_are_validated() {
        let db = create_db();
        assert!(matches!(
            db.table(""),
            Err(CoreError::InvalidTableName { .. })
        ));
        assert!(matches!(
            db.table("a.b"),
            Err(CoreError::InvalidTableName { .. })
        ));
        assert!(db.table("ok").is_ok());
    }

    #[test]
    fn tables_are_registered_lazily() {
        let db = create_db();
        assert!(db.table_names().is_empty());
        db.table("b").unwrap();
        db.table("a").unwrap().set("1", Entry::new()).unwrap();
        assert_eq!(db.table_names(), vec!["a".to_string(), "b".to_string()]);
        let names: Vec<String> = (&db).into_iter().map(|t| t.name().to_string()).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn raw_access_uses_composite_keys() {
        let db = create_db();
        db.raw_set("t.k", entry! { "v" => 1 }).unwrap();
        assert_eq!(db.table("t").unwrap().get("k").unwrap(), entry! { "v" => 1 });
        assert_eq!(db.raw_get("t.missing").unwrap(), Entry::new());
        assert_eq!(db.raw_keys().unwrap(), vec!["t.k".to_string()]);
        assert!(db.raw_delete("t.k").unwrap());
        assert!(db.raw_get("nodot").is_err());
    }

    #[test]
    fn keys_may_contain_separator() {
        let db = create_db();
        let t = db.table("t").unwrap();
        t.set("a.b", entry! { "v" => 1 }).unwrap();
        assert_eq!(t.keys().unwrap(), vec!["a.b".to_string()]);
        assert_eq!(db.raw_get("t.a.b").unwrap(), entry! { "v" => 1 });
    }

    #[test]
    fn close_is_idempotent() {
        let db = create_db();
        let t = db.table("t").unwrap();
        t.set("1", Entry::new()).unwrap();
        db.close().unwrap();
        db.close().unwrap();
        assert!(!db.is_open());
        assert!(matches!(t.get("1"), Err(CoreError::DatabaseClosed)));
        assert!(matches!(
            t.set("2", Entry::new()),
            Err(CoreError::DatabaseClosed)
        ));
        assert!(matches!(db.sync(), Err(CoreError::DatabaseClosed)));
        assert!(matches!(db.table("t"), Err(CoreError::DatabaseClosed)));
    }

    #[test]
    fn writeback_defers_until_sync() {
        let db = Database::open_with_backend(
            Config::new().writeback(true),
            Box::new(InMemoryBackend::new()),
        )
        .unwrap();
        let t = db.table("t").unwrap();
        t.set("1", entry! { "v" => 1 }).unwrap();
        t.set("2", entry! { "v" => 2 }).unwrap();
        assert_eq!(db.pending_writes(), 2);
        assert_eq!(t.get("1").unwrap(), entry! { "v" => 1 });

        t.set_with_sync("3", entry! { "v" => 3 }).unwrap();
        assert_eq!(db.pending_writes(), 2);

        db.sync().unwrap();
        assert_eq!(db.pending_writes(), 0);
    }

    #[test]
    fn batch_holds_lock_and_defers_sync() {
        let db = Database::open_with_backend(
            Config::new().writeback(true),
            Box::new(InMemoryBackend::new()),
        )
        .unwrap();
        let count = db
            .batch(|batch| {
                batch.set("t", "1", entry! { "v" => 1 })?;
                batch.set_with_sync("t", "2", entry! { "v" => 2 })?;
                batch.update("t", "1", entry! { "w" => 2 })?;
                assert_eq!(db.pending_writes(), 2);
                Ok(batch.writes())
            })
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(db.pending_writes(), 0);
        assert_eq!(
            db.table("t").unwrap().get("1").unwrap(),
            entry! { "v" => 1, "w" => 2 }
        );
    }

    #[test]
    fn index_stats_and_drop() {
        let db = create_db();
        let t = db.table("t").unwrap();
        t.set("1", entry! { "x" => 1 }).unwrap();
        t.set("2", entry! { "x" => 1 }).unwrap();
        t.query("x", |_| true, None).unwrap();
        let stats = db.index_stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].distinct_values, 1);
        assert_eq!(stats[0].keys, 2);

        db.drop_indexes();
        assert!(db.index_stats().is_empty());
        assert_eq!(t.query("x", |_| true, None).unwrap().len(), 2);
    }

    #[test]
    fn file_database_persists() {
        let dir = tempdir().unwrap();
        let name = dir.path().join("db");
        {
            let db = Database::open(&name).unwrap();
            assert!(db.serializes());
            db.table("t").unwrap().set("1", entry! { "v" => 1.5 }).unwrap();
        }
        let db = Database::open(&name).unwrap();
        assert_eq!(db.table_names(), vec!["t".to_string()]);
        assert_eq!(db.table("t").unwrap().get("1").unwrap(), entry! { "v" => 1.5 });
    }

    #[test]
    fn missing_storage_in_read_write_mode() {
        let dir = tempdir().unwrap();
        let result = Database::open_with_config(
            dir.path().join("absent"),
            Config::new().mode(OpenMode::ReadWrite),
        );
        assert!(matches!(
            result,
            Err(CoreError::Storage(StorageError::NotFound { .. }))
        ));
    }

    #[test]
    fn read_only_rejects_writes() {
        let dir = tempdir().unwrap();
        let name = dir.path().join("db");
        Database::open(&name)
            .unwrap()
            .table("t")
            .unwrap()
            .set("1", Entry::new())
            .unwrap();

        let db = Database::open_with_config(&name, Config::new().read_only()).unwrap();
        assert!(db.is_read_only());
        let t = db.table("t").unwrap();
        assert!(t.contains("1").unwrap());
        assert!(matches!(
            t.set("2", Entry::new()),
            Err(CoreError::Storage(StorageError::ReadOnly))
        ));
    }

    #[test]
    fn second_handle_is_locked_out() {
        let dir = tempdir().unwrap();
        let name = dir.path().join("db");
        let _db = Database::open(&name).unwrap();
        assert!(matches!(
            Database::open(&name),
            Err(CoreError::Storage(StorageError::Locked { .. }))
        ));
    }
}
