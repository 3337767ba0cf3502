//! Backend trait definition and the shared vocabulary of the backends.

use crate::error::{StorageError, StorageResult};
use crate::file::FileBackend;
use crate::memory::InMemoryBackend;
use crate::split::SplitBackend;
use crate::whole_file::WholeFileBackend;
use shelfdb_codec::Value;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Separator between the table name and the record key in a composite key.
pub const KEY_SEPARATOR: char = '.';

/// A persistence provider for ShelfDB.
///
/// Backends store [`Value`]s under composite `table.key` identifiers. They do
/// not know about entries, tables or indexes; the database owns those.
///
/// # Invariants
///
/// - `get` after `set` on the same key returns the stored value
/// - `keys` lists every stored key in ascending order
/// - `sync` makes every previous write durable (for persistent variants)
/// - Every operation after `close` fails with [`StorageError::Closed`]
/// - Backends must be `Send + Sync` so a database can be shared across threads
///
/// # Implementors
///
/// - [`FileBackend`] - one append-only log per database (the default)
/// - [`SplitBackend`] - one log per table
/// - [`WholeFileBackend`] - whole map held in memory, dumped on sync
/// - [`InMemoryBackend`] - volatile, for tests and scratch databases
pub trait Backend: Send + Sync {
    /// Reads the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed or the stored bytes cannot
    /// be read back.
    fn get(&self, key: &str) -> StorageResult<Option<Value>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed, read-only, or the write fails.
    fn set(&mut self, key: &str, value: Value) -> StorageResult<()>;

    /// Removes `key`. Returns whether it was present.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed, read-only, or the write fails.
    fn delete(&mut self, key: &str) -> StorageResult<bool>;

    /// Returns whether `key` is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed.
    fn contains(&self, key: &str) -> StorageResult<bool>;

    /// Lists every stored key in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed.
    fn keys(&self) -> StorageResult<Vec<String>>;

    /// Lists the keys that start with `prefix`, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed.
    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .keys()?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    /// Flushes buffered writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed or the flush fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Reclaims space held by overwritten or deleted records.
    ///
    /// Variants without dead space treat this as a sync.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed, read-only, or rewriting fails.
    fn compact(&mut self) -> StorageResult<()> {
        self.sync()
    }

    /// Flushes and releases the underlying storage.
    ///
    /// Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails. The backend is closed
    /// regardless.
    fn close(&mut self) -> StorageResult<()>;

    /// Whether the caller should hand this backend pre-serialized values.
    ///
    /// Variants that keep values in memory return `false` and receive
    /// documents as native [`Value`] maps.
    fn needs_serialization(&self) -> bool;

    /// Whether the backend rejects writes.
    fn is_read_only(&self) -> bool {
        false
    }

    /// Whether [`close`](Backend::close) has been called.
    fn is_closed(&self) -> bool;

    /// Short human-readable description, e.g. `file:/data/app.sdb`.
    fn describe(&self) -> String;
}

/// How an on-disk backend treats existing storage when opening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Open existing storage or create it when missing.
    #[default]
    CreateIfMissing,
    /// Open existing storage for reading and writing; fail when missing.
    ReadWrite,
    /// Open existing storage for reading only; fail when missing.
    ReadOnly,
    /// Always start from empty storage, discarding existing content.
    ForceNew,
}

impl OpenMode {
    /// Whether backends opened in this mode accept writes.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        !matches!(self, OpenMode::ReadOnly)
    }

    /// Whether this mode creates storage that does not exist yet.
    #[must_use]
    pub const fn creates(self) -> bool {
        matches!(self, OpenMode::CreateIfMissing | OpenMode::ForceNew)
    }
}

/// The registered backend variants.
///
/// The default is chosen explicitly and never inferred from what is on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendKind {
    /// [`FileBackend`]: `<name>.sdb`.
    #[default]
    File,
    /// [`SplitBackend`]: `<name>.sdd/<table>.sdb`.
    Split,
    /// [`WholeFileBackend`]: `<name>.sdw`.
    WholeFile,
    /// [`InMemoryBackend`]: nothing on disk.
    InMemory,
}

impl BackendKind {
    /// All registered kinds.
    pub const ALL: [BackendKind; 4] = [
        BackendKind::File,
        BackendKind::Split,
        BackendKind::WholeFile,
        BackendKind::InMemory,
    ];

    /// Short lowercase name of the kind.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            BackendKind::File => "file",
            BackendKind::Split => "split",
            BackendKind::WholeFile => "whole",
            BackendKind::InMemory => "memory",
        }
    }

    /// Fixed suffix appended to the storage name, if the kind uses one.
    #[must_use]
    pub const fn suffix(self) -> Option<&'static str> {
        match self {
            BackendKind::File => Some(crate::file::LOG_SUFFIX),
            BackendKind::Split => Some(crate::split::DIR_SUFFIX),
            BackendKind::WholeFile => Some(crate::whole_file::DUMP_SUFFIX),
            BackendKind::InMemory => None,
        }
    }

    /// Path the storage named `name` occupies for this kind.
    #[must_use]
    pub fn storage_path(self, name: &Path) -> Option<PathBuf> {
        self.suffix().map(|suffix| with_suffix(name, suffix))
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| format!("unknown backend kind: {s}"))
    }
}

/// Opens the backend of the given kind for the storage named `name`.
///
/// `name` is the storage identifier without suffix; each kind appends its own.
/// [`BackendKind::InMemory`] ignores both `name` and `mode`.
///
/// # Errors
///
/// Returns an error if the storage cannot be opened in the requested mode.
pub fn open_backend(
    kind: BackendKind,
    name: &Path,
    mode: OpenMode,
) -> StorageResult<Box<dyn Backend>> {
    Ok(match kind {
        BackendKind::File => Box::new(FileBackend::open(name, mode)?),
        BackendKind::Split => Box::new(SplitBackend::open(name, mode)?),
        BackendKind::WholeFile => Box::new(WholeFileBackend::open(name, mode)?),
        BackendKind::InMemory => Box::new(InMemoryBackend::new()),
    })
}

/// Joins a table name and a record key into a composite key.
#[must_use]
pub fn join_key(table: &str, key: &str) -> String {
    let mut composite = String::with_capacity(table.len() + 1 + key.len());
    composite.push_str(table);
    composite.push(KEY_SEPARATOR);
    composite.push_str(key);
    composite
}

/// Splits a composite key at its first separator.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] if there is no separator or the
/// table part is empty.
pub fn split_key(composite: &str) -> StorageResult<(&str, &str)> {
    match composite.split_once(KEY_SEPARATOR) {
        Some((table, key)) if !table.is_empty() => Ok((table, key)),
        _ => Err(StorageError::InvalidKey(composite.to_string())),
    }
}

/// Appends `suffix` to the final component of `name`.
pub(crate) fn with_suffix(name: &Path, suffix: &str) -> PathBuf {
    let mut os: OsString = name.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_keys() {
        assert_eq!(join_key("users", "42"), "users.42");
        assert_eq!(split_key("users.42").unwrap(), ("users", "42"));
        // Only the first separator splits; keys may contain dots.
        assert_eq!(split_key("users.a.b").unwrap(), ("users", "a.b"));
        assert_eq!(split_key("users.").unwrap(), ("users", ""));
    }

    #[test]
    fn malformed_composite_keys() {
        assert!(matches!(split_key("nodot"), Err(StorageError::InvalidKey(_))));
        assert!(matches!(split_key(".key"), Err(StorageError::InvalidKey(_))));
    }

    #[test]
    fn open_modes() {
        assert!(OpenMode::CreateIfMissing.is_writable());
        assert!(!OpenMode::ReadOnly.is_writable());
        assert!(OpenMode::ForceNew.creates());
        assert!(!OpenMode::ReadWrite.creates());
        assert_eq!(OpenMode::default(), OpenMode::CreateIfMissing);
    }

    #[test]
    fn backend_kind_names() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.name().parse::<BackendKind>().unwrap(), kind);
        }
        assert!("dbm".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::default(), BackendKind::File);
    }

    #[test]
    fn storage_paths() {
        let name = Path::new("/tmp/app");
        assert_eq!(
            BackendKind::File.storage_path(name).unwrap(),
            PathBuf::from("/tmp/app.sdb")
        );
        assert_eq!(
            BackendKind::Split.storage_path(name).unwrap(),
            PathBuf::from("/tmp/app.sdd")
        );
        assert!(BackendKind::InMemory.storage_path(name).is_none());
    }
}
