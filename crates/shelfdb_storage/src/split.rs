//! Backend keeping one log per table.
//!
//! Directory layout:
//!
//! ```text
//! <name>.sdd/
//! ├─ LOCK          # Advisory lock for single-writer
//! ├─ users.sdb     # Log for table "users"
//! └─ orders.sdb    # Log for table "orders"
//! ```

use crate::backend::{join_key, split_key, with_suffix, Backend, OpenMode};
use crate::error::{StorageError, StorageResult};
use crate::file::{FileBackend, LOG_SUFFIX};
use fs2::FileExt;
use shelfdb_codec::Value;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Suffix appended to the storage name to form the directory.
pub const DIR_SUFFIX: &str = ".sdd";

const LOCK_FILE: &str = "LOCK";

/// A persistent backend storing each table in its own [`FileBackend`] log.
///
/// Tables are discovered from the directory at open and created on their
/// first write. A table left empty at close has its log removed.
#[derive(Debug)]
pub struct SplitBackend {
    dir: PathBuf,
    tables: BTreeMap<String, FileBackend>,
    read_only: bool,
    closed: bool,
    /// Lock file handle, held while open. Absent for read-only handles on a
    /// directory that never had a writer.
    lock_file: Option<File>,
}

impl SplitBackend {
    /// Opens the directory `<name>.sdd` in the given mode.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the directory is missing and
    /// `mode` does not create it, [`StorageError::Locked`] if another handle
    /// holds it, or any error from opening a table log.
    pub fn open(name: &Path, mode: OpenMode) -> StorageResult<Self> {
        let dir = with_suffix(name, DIR_SUFFIX);
        if !dir.exists() {
            if mode.creates() {
                fs::create_dir_all(&dir)?;
            } else {
                return Err(StorageError::NotFound { path: dir });
            }
        }
        if !dir.is_dir() {
            return Err(StorageError::corrupted(format!(
                "path is not a directory: {}",
                dir.display()
            )));
        }

        let read_only = !mode.is_writable();
        let lock_file = Self::lock(&dir, read_only)?;

        if mode == OpenMode::ForceNew {
            for path in Self::table_files(&dir)? {
                fs::remove_file(path)?;
            }
        }

        let table_mode = if read_only {
            OpenMode::ReadOnly
        } else {
            OpenMode::ReadWrite
        };
        let mut tables = BTreeMap::new();
        for path in Self::table_files(&dir)? {
            let Some(table) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let table = table.to_string();
            tables.insert(table, FileBackend::open_path(&path, table_mode)?);
        }

        tracing::debug!(dir = %dir.display(), tables = tables.len(), "opened split storage");
        Ok(Self {
            dir,
            tables,
            read_only,
            closed: false,
            lock_file,
        })
    }

    /// Returns the storage directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Names of the tables that currently have a log.
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    fn lock(dir: &Path, read_only: bool) -> StorageResult<Option<File>> {
        let lock_path = dir.join(LOCK_FILE);
        if read_only && !lock_path.exists() {
            return Ok(None);
        }
        let lock_file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(!read_only)
            .truncate(false)
            .open(&lock_path)?;
        let locked = if read_only {
            FileExt::try_lock_shared(&lock_file).is_ok()
        } else {
            FileExt::try_lock_exclusive(&lock_file).is_ok()
        };
        if !locked {
            return Err(StorageError::Locked { path: lock_path });
        }
        Ok(Some(lock_file))
    }

    fn table_files(dir: &Path) -> StorageResult<Vec<PathBuf>> {
        let suffix = LOG_SUFFIX.trim_start_matches('.');
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(suffix) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    fn table_for_write(&mut self, table: &str) -> StorageResult<&mut FileBackend> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        if !self.tables.contains_key(table) {
            let name = self.dir.join(table);
            let backend = FileBackend::open(&name, OpenMode::CreateIfMissing)?;
            tracing::debug!(table, "created table log");
            self.tables.insert(table.to_string(), backend);
        }
        self.tables
            .get_mut(table)
            .ok_or_else(|| StorageError::InvalidKey(table.to_string()))
    }
}

impl Backend for SplitBackend {
    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        self.ensure_open()?;
        let (table, key) = split_key(key)?;
        match self.tables.get(table) {
            Some(backend) => backend.get(key),
            None => Ok(None),
        }
    }

    fn set(&mut self, key: &str, value: Value) -> StorageResult<()> {
        self.ensure_open()?;
        let (table, key) = split_key(key)?;
        self.table_for_write(table)?.set(key, value)
    }

    fn delete(&mut self, key: &str) -> StorageResult<bool> {
        self.ensure_open()?;
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        let (table, key) = split_key(key)?;
        match self.tables.get_mut(table) {
            Some(backend) => backend.delete(key),
            None => Ok(false),
        }
    }

    fn contains(&self, key: &str) -> StorageResult<bool> {
        self.ensure_open()?;
        let (table, key) = split_key(key)?;
        match self.tables.get(table) {
            Some(backend) => backend.contains(key),
            None => Ok(false),
        }
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        self.ensure_open()?;
        let mut keys = Vec::new();
        for (table, backend) in &self.tables {
            keys.extend(backend.keys()?.iter().map(|key| join_key(table, key)));
        }
        // Table order and composite-key order differ when names share a prefix.
        keys.sort();
        Ok(keys)
    }

    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.ensure_open()?;
        let Ok((table, rest)) = split_key(prefix) else {
            let mut keys = self.keys()?;
            keys.retain(|k| k.starts_with(prefix));
            return Ok(keys);
        };
        match self.tables.get(table) {
            Some(backend) => Ok(backend
                .keys_with_prefix(rest)?
                .iter()
                .map(|key| join_key(table, key))
                .collect()),
            None => Ok(Vec::new()),
        }
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.ensure_open()?;
        for backend in self.tables.values_mut() {
            backend.sync()?;
        }
        Ok(())
    }

    fn compact(&mut self) -> StorageResult<()> {
        self.ensure_open()?;
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        for backend in self.tables.values_mut() {
            backend.compact()?;
        }
        Ok(())
    }

    fn close(&mut self) -> StorageResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut first_error = None;
        for (table, mut backend) in std::mem::take(&mut self.tables) {
            if let Err(e) = backend.close() {
                first_error.get_or_insert(e);
                continue;
            }
            if !self.read_only && backend.is_empty() {
                let path = backend.path().to_path_buf();
                drop(backend);
                tracing::debug!(table = %table, "removing empty table log");
                if let Err(e) = fs::remove_file(path) {
                    first_error.get_or_insert(e.into());
                }
            }
        }
        if let Some(lock_file) = self.lock_file.take() {
            let _ = FileExt::unlock(&lock_file);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn needs_serialization(&self) -> bool {
        true
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn describe(&self) -> String {
        format!("split:{}", self.dir.display())
    }
}

impl Drop for SplitBackend {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(dir = %self.dir.display(), error = %e, "failed to close split storage");
        }
    }
}
