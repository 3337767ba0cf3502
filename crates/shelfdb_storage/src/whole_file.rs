//! Backend that loads the whole database into memory and dumps it on sync.
//!
//! File layout:
//!
//! ```text
//! | magic "SHWF" (4) | version (2, LE) | reserved (2) | crc32 (4, LE) | payload |
//! ```
//!
//! The payload is the canonical CBOR map of every key to its value.

use crate::backend::{with_suffix, Backend, OpenMode};
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use shelfdb_codec::{from_cbor, to_canonical_cbor, Value};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Suffix appended to the storage name.
pub const DUMP_SUFFIX: &str = ".sdw";

const MAGIC: &[u8; 4] = b"SHWF";
const VERSION: u16 = 1;
const HEADER_SIZE: usize = 12;
const TMP_SUFFIX: &str = ".tmp";

/// A persistent backend that keeps every value in memory.
///
/// The dump is read once at open. Writes only touch memory until
/// [`sync`](Backend::sync) or [`close`](Backend::close) rewrites the dump,
/// so anything written since the last sync is lost on a crash. Rewrites go
/// through a temporary file renamed over the dump.
#[derive(Debug)]
pub struct WholeFileBackend {
    path: PathBuf,
    /// Locked handle on the current dump.
    file: File,
    data: BTreeMap<String, Value>,
    dirty: bool,
    read_only: bool,
    closed: bool,
}

impl WholeFileBackend {
    /// Opens the dump `<name>.sdw` in the given mode.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the dump is missing and `mode`
    /// does not create it, [`StorageError::Locked`] if another handle holds
    /// it, and [`StorageError::Corrupted`] if the dump fails validation.
    pub fn open(name: &Path, mode: OpenMode) -> StorageResult<Self> {
        let path = with_suffix(name, DUMP_SUFFIX);
        let exists = path.exists();
        if !exists && !mode.creates() {
            return Err(StorageError::NotFound { path });
        }

        let read_only = !mode.is_writable();
        let mut file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(mode.creates())
            .truncate(false)
            .open(&path)?;
        let locked = if read_only {
            FileExt::try_lock_shared(&file).is_ok()
        } else {
            FileExt::try_lock_exclusive(&file).is_ok()
        };
        if !locked {
            return Err(StorageError::Locked { path });
        }

        let fresh = !exists || mode == OpenMode::ForceNew;
        let data = if fresh {
            BTreeMap::new()
        } else {
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes)?;
            decode_dump(&bytes)?
        };

        let mut backend = Self {
            path,
            file,
            data,
            dirty: fresh,
            read_only,
            closed: false,
        };
        if fresh {
            backend.write_dump()?;
        }
        tracing::debug!(
            path = %backend.path.display(),
            keys = backend.data.len(),
            "loaded whole-file dump"
        );
        Ok(backend)
    }

    /// Returns the path of the dump file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether there are writes not yet dumped.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> StorageResult<()> {
        self.ensure_open()?;
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        Ok(())
    }

    fn write_dump(&mut self) -> StorageResult<()> {
        let bytes = encode_dump(&self.data)?;
        let tmp_path = with_suffix(&self.path, TMP_SUFFIX);
        let mut tmp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        if FileExt::try_lock_exclusive(&tmp).is_err() {
            return Err(StorageError::Locked { path: tmp_path });
        }
        tmp.write_all(&bytes)?;
        tmp.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;

        // The renamed handle now is the dump; dropping the old one releases its lock.
        self.file = tmp;
        self.dirty = false;
        tracing::debug!(path = %self.path.display(), bytes = bytes.len(), "wrote dump");
        Ok(())
    }
}

fn encode_dump(data: &BTreeMap<String, Value>) -> StorageResult<Vec<u8>> {
    let map = Value::Map(
        data.iter()
            .map(|(k, v)| (Value::Text(k.clone()), v.clone()))
            .collect(),
    );
    let payload = to_canonical_cbor(&map)?;
    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&VERSION.to_le_bytes());
    bytes.extend_from_slice(&[0, 0]);
    bytes.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

fn decode_dump(bytes: &[u8]) -> StorageResult<BTreeMap<String, Value>> {
    if bytes.len() < HEADER_SIZE || &bytes[..4] != MAGIC {
        return Err(StorageError::corrupted("missing whole-file header"));
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != VERSION {
        return Err(StorageError::corrupted(format!(
            "unsupported whole-file version {version}"
        )));
    }
    let stored_crc = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let payload = &bytes[HEADER_SIZE..];
    if crc32fast::hash(payload) != stored_crc {
        return Err(StorageError::corrupted("whole-file checksum mismatch"));
    }

    let Value::Map(pairs) = from_cbor(payload)? else {
        return Err(StorageError::corrupted("whole-file payload is not a map"));
    };
    pairs
        .into_iter()
        .map(|(k, v)| match k {
            Value::Text(key) => Ok((key, v)),
            _ => Err(StorageError::corrupted("whole-file key is not text")),
        })
        .collect()
}

impl Backend for WholeFileBackend {
    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        self.ensure_open()?;
        Ok(self.data.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> StorageResult<()> {
        self.ensure_writable()?;
        self.data.insert(key.to_string(), value);
        self.dirty = true;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> StorageResult<bool> {
        self.ensure_writable()?;
        let existed = self.data.remove(key).is_some();
        self.dirty |= existed;
        Ok(existed)
    }

    fn contains(&self, key: &str) -> StorageResult<bool> {
        self.ensure_open()?;
        Ok(self.data.contains_key(key))
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self.data.keys().cloned().collect())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.ensure_open()?;
        if self.dirty && !self.read_only {
            self.write_dump()?;
        }
        Ok(())
    }

    fn close(&mut self) -> StorageResult<()> {
        if self.closed {
            return Ok(());
        }
        let result = self.sync();
        self.closed = true;
        let _ = FileExt::unlock(&self.file);
        result
    }

    fn needs_serialization(&self) -> bool {
        false
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn describe(&self) -> String {
        format!("whole:{}", self.path.display())
    }
}

impl Drop for WholeFileBackend {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to close dump");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(dir: &Path, mode: OpenMode) -> StorageResult<WholeFileBackend> {
        WholeFileBackend::open(&dir.join("db"), mode)
    }

    #[test]
    fn open_creates_empty_dump() {
        let dir = tempdir().unwrap();
        let backend = open(dir.path(), OpenMode::CreateIfMissing).unwrap();
        assert!(backend.path().exists());
        assert!(!backend.is_dirty());
        assert!(backend.keys().unwrap().is_empty());
    }

    #[test]
    fn writes_stay_in_memory_until_sync() {
        let dir = tempdir().unwrap();
        let mut backend = open(dir.path(), OpenMode::CreateIfMissing).unwrap();
        let before = fs::read(backend.path()).unwrap();

        backend.set("t.a", Value::from(1)).unwrap();
        assert!(backend.is_dirty());
        assert_eq!(fs::read(backend.path()).unwrap(), before);

        backend.sync().unwrap();
        assert!(!backend.is_dirty());
        assert_ne!(fs::read(backend.path()).unwrap(), before);
    }

    #[test]
    fn dump_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut backend = open(dir.path(), OpenMode::CreateIfMissing).unwrap();
            backend.set("t.a", Value::from(1.5)).unwrap();
            backend.set("t.b", Value::from("b")).unwrap();
            assert!(backend.delete("t.b").unwrap());
            backend.close().unwrap();
        }
        let backend = open(dir.path(), OpenMode::ReadWrite).unwrap();
        assert_eq!(backend.get("t.a").unwrap(), Some(Value::from(1.5)));
        assert!(!backend.contains("t.b").unwrap());
        assert!(!dir.path().join("db.sdw.tmp").exists());
    }

    #[test]
    fn corrupted_dump_rejected() {
        let dir = tempdir().unwrap();
        {
            let mut backend = open(dir.path(), OpenMode::CreateIfMissing).unwrap();
            backend.set("t.a", Value::from("hello")).unwrap();
            backend.close().unwrap();
        }
        let path = dir.path().join("db.sdw");
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            open(dir.path(), OpenMode::ReadWrite),
            Err(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn lock_held_after_sync() {
        let dir = tempdir().unwrap();
        let mut backend = open(dir.path(), OpenMode::CreateIfMissing).unwrap();
        backend.set("t.a", Value::Null).unwrap();
        backend.sync().unwrap();
        assert!(matches!(
            open(dir.path(), OpenMode::ReadWrite),
            Err(StorageError::Locked { .. })
        ));
    }

    #[test]
    fn read_only_and_closed() {
        let dir = tempdir().unwrap();
        drop(open(dir.path(), OpenMode::CreateIfMissing).unwrap());

        let mut backend = open(dir.path(), OpenMode::ReadOnly).unwrap();
        assert!(matches!(
            backend.set("t.a", Value::Null),
            Err(StorageError::ReadOnly)
        ));
        backend.close().unwrap();
        assert!(matches!(backend.keys(), Err(StorageError::Closed)));
    }
}
