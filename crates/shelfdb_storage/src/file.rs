//! Append-only log backend, the default persistent storage.

use crate::backend::{with_suffix, Backend, OpenMode};
use crate::error::{StorageError, StorageResult};
use crate::record::{frame, read_frame, Frame, LogRecord, HEADER_SIZE};
use fs2::FileExt;
use parking_lot::RwLock;
use shelfdb_codec::Value;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Suffix appended to the storage name.
pub const LOG_SUFFIX: &str = ".sdb";

/// Suffix of the scratch file written during compaction.
const COMPACT_SUFFIX: &str = ".tmp";

/// Where the latest record for a key lives in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RecordLocation {
    /// Offset of the payload (just past the frame header).
    offset: u64,
    /// Payload length.
    len: u32,
}

impl RecordLocation {
    fn frame_len(self) -> u64 {
        HEADER_SIZE as u64 + u64::from(self.len)
    }
}

/// A persistent backend storing every write as a record appended to one log.
///
/// The log is replayed on open to rebuild an in-memory map from key to the
/// location of its latest record, so reads cost one positioned read.
///
/// # Recovery
///
/// - A last record with an intact header but a short payload, or a partial
///   header at the very end, is a torn write: it is cut off and a warning is
///   logged
/// - Any checksum failure, header or payload, is [`StorageError::Corrupted`]
///   and the log is left untouched
///
/// # Locking
///
/// The log is locked with an advisory lock for as long as the backend is
/// open: exclusive for writers, shared for read-only handles.
///
/// # Example
///
/// ```no_run
/// use shelfdb_storage::{Backend, FileBackend, OpenMode};
/// use shelfdb_codec::Value;
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("app"), OpenMode::CreateIfMissing).unwrap();
/// backend.set("users.1", Value::from("Ada")).unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: RwLock<File>,
    index: BTreeMap<String, RecordLocation>,
    /// Offset the next record is appended at.
    end: u64,
    /// Bytes occupied by the latest record of each live key.
    live_bytes: u64,
    read_only: bool,
    closed: bool,
}

impl FileBackend {
    /// Opens the log `<name>.sdb` in the given mode.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the log is missing and `mode`
    /// does not create it, [`StorageError::Locked`] if another handle holds
    /// it, and [`StorageError::Corrupted`] if replay finds damaged records.
    pub fn open(name: &Path, mode: OpenMode) -> StorageResult<Self> {
        Self::open_path(&with_suffix(name, LOG_SUFFIX), mode)
    }

    /// Opens the log at an exact path, without appending a suffix.
    ///
    /// # Errors
    ///
    /// See [`FileBackend::open`].
    pub fn open_path(path: &Path, mode: OpenMode) -> StorageResult<Self> {
        if !mode.creates() && !path.exists() {
            return Err(StorageError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let read_only = !mode.is_writable();
        let mut file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(mode.creates())
            .truncate(false)
            .open(path)?;

        let locked = if read_only {
            FileExt::try_lock_shared(&file).is_ok()
        } else {
            FileExt::try_lock_exclusive(&file).is_ok()
        };
        if !locked {
            return Err(StorageError::Locked {
                path: path.to_path_buf(),
            });
        }

        if mode == OpenMode::ForceNew {
            file.set_len(0)?;
        }

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let mut backend = Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            index: BTreeMap::new(),
            end: 0,
            live_bytes: 0,
            read_only,
            closed: false,
        };
        backend.replay(&data)?;

        tracing::debug!(
            path = %backend.path.display(),
            keys = backend.index.len(),
            bytes = backend.end,
            "opened log"
        );
        Ok(backend)
    }

    /// Returns the path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the log holds no live keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Bytes of the log occupied by live records.
    #[must_use]
    pub fn live_bytes(&self) -> u64 {
        self.live_bytes
    }

    /// Bytes of the log occupied by overwritten or deleted records.
    #[must_use]
    pub fn dead_bytes(&self) -> u64 {
        self.end - self.live_bytes
    }

    fn replay(&mut self, data: &[u8]) -> StorageResult<()> {
        let mut pos = 0usize;
        while pos < data.len() {
            match read_frame(&data[pos..]) {
                Frame::Valid { payload, consumed } => {
                    let record = LogRecord::decode_payload(payload)?;
                    let location = RecordLocation {
                        offset: (pos + HEADER_SIZE) as u64,
                        len: (consumed - HEADER_SIZE) as u32,
                    };
                    self.apply(record.key(), matches!(record, LogRecord::Put { .. }), location);
                    pos += consumed;
                }
                Frame::Corrupted(reason) => {
                    return Err(StorageError::corrupted(format!(
                        "{reason} at offset {pos} in {}",
                        self.path.display()
                    )));
                }
                Frame::Truncated => {
                    self.repair_tail(pos as u64, data.len() as u64)?;
                    break;
                }
            }
        }
        self.end = pos as u64;
        Ok(())
    }

    /// Applies a replayed record to the in-memory map.
    fn apply(&mut self, key: &str, is_put: bool, location: RecordLocation) {
        if let Some(previous) = self.index.remove(key) {
            self.live_bytes -= previous.frame_len();
        }
        if is_put {
            self.live_bytes += location.frame_len();
            self.index.insert(key.to_string(), location);
        }
    }

    fn repair_tail(&mut self, valid_len: u64, file_len: u64) -> StorageResult<()> {
        tracing::warn!(
            path = %self.path.display(),
            valid_len,
            discarded = file_len - valid_len,
            "discarding torn record at end of log"
        );
        if !self.read_only {
            let file = self.file.write();
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok(())
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

    fn read_payload(&self, location: RecordLocation) -> StorageResult<Vec<u8>> {
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(location.offset))?;
        let mut buffer = vec![0u8; location.len as usize];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, record: &LogRecord) -> StorageResult<RecordLocation> {
        let framed = frame(&record.encode_payload()?)?;
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(self.end))?;
        file.write_all(&framed)?;

        let location = RecordLocation {
            offset: self.end + HEADER_SIZE as u64,
            len: (framed.len() - HEADER_SIZE) as u32,
        };
        self.end += framed.len() as u64;
        Ok(location)
    }

    /// Rewrites the log keeping only the latest record of each live key.
    ///
    /// The new log is written next to the old one and renamed over it, so a
    /// crash mid-compaction leaves the old log intact.
    fn rewrite(&mut self) -> StorageResult<()> {
        let tmp_path = with_suffix(&self.path, COMPACT_SUFFIX);
        let tmp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        if FileExt::try_lock_exclusive(&tmp).is_err() {
            return Err(StorageError::Locked { path: tmp_path });
        }

        let mut new_index = BTreeMap::new();
        let mut offset = 0u64;
        {
            let mut writer = BufWriter::new(&tmp);
            for (key, location) in &self.index {
                let payload = self.read_payload(*location)?;
                let framed = frame(&payload)?;
                writer.write_all(&framed)?;
                new_index.insert(
                    key.clone(),
                    RecordLocation {
                        offset: offset + HEADER_SIZE as u64,
                        len: location.len,
                    },
                );
                offset += framed.len() as u64;
            }
            writer.flush()?;
        }
        tmp.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;

        let reclaimed = self.end - offset;
        *self.file.write() = tmp;
        self.index = new_index;
        self.end = offset;
        self.live_bytes = offset;

        tracing::debug!(path = %self.path.display(), reclaimed, "compacted log");
        Ok(())
    }
}

impl Backend for FileBackend {
    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        self.ensure_open()?;
        let Some(location) = self.index.get(key).copied() else {
            return Ok(None);
        };
        let payload = self.read_payload(location)?;
        match LogRecord::decode_payload(&payload)? {
            LogRecord::Put { value, .. } => Ok(Some(value)),
            LogRecord::Delete { .. } => Err(StorageError::corrupted(format!(
                "index points at a delete record for {key:?}"
            ))),
        }
    }

    fn set(&mut self, key: &str, value: Value) -> StorageResult<()> {
        self.ensure_writable()?;
        let location = self.append(&LogRecord::Put {
            key: key.to_string(),
            value,
        })?;
        if let Some(previous) = self.index.insert(key.to_string(), location) {
            self.live_bytes -= previous.frame_len();
        }
        self.live_bytes += location.frame_len();
        Ok(())
    }

    fn delete(&mut self, key: &str) -> StorageResult<bool> {
        self.ensure_writable()?;
        if !self.index.contains_key(key) {
            return Ok(false);
        }
        self.append(&LogRecord::Delete {
            key: key.to_string(),
        })?;
        if let Some(previous) = self.index.remove(key) {
            self.live_bytes -= previous.frame_len();
        }
        Ok(true)
    }

    fn contains(&self, key: &str) -> StorageResult<bool> {
        self.ensure_open()?;
        Ok(self.index.contains_key(key))
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self.index.keys().cloned().collect())
    }

    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self
            .index
            .range(prefix.to_string()..)
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.ensure_open()?;
        if self.read_only {
            return Ok(());
        }
        let mut file = self.file.write();
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    fn compact(&mut self) -> StorageResult<()> {
        self.ensure_writable()?;
        if self.dead_bytes() == 0 {
            return self.sync();
        }
        self.rewrite()
    }

    fn close(&mut self) -> StorageResult<()> {
        if self.closed {
            return Ok(());
        }
        let result = if self.read_only {
            Ok(())
        } else if self.dead_bytes() > self.live_bytes {
            self.rewrite()
        } else {
            self.sync()
        };
        self.closed = true;
        let _ = FileExt::unlock(&*self.file.read());
        result
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
        format!("file:{}", self.path.display())
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to close log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(dir: &Path, mode: OpenMode) -> StorageResult<FileBackend> {
        FileBackend::open(&dir.join("db"), mode)
    }

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let backend = open(dir.path(), OpenMode::CreateIfMissing).unwrap();
        assert!(backend.is_empty());
        assert!(dir.path().join("db.sdb").exists());
        assert_eq!(backend.path(), dir.path().join("db.sdb"));
    }

    #[test]
    fn missing_log_not_created_in_read_modes() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            open(dir.path(), OpenMode::ReadWrite),
            Err(StorageError::NotFound { .. })
        ));
        assert!(matches!(
            open(dir.path(), OpenMode::ReadOnly),
            Err(StorageError::NotFound { .. })
        ));
    }

    #[test]
    fn set_get_delete() {
        let dir = tempdir().unwrap();
        let mut backend = open(dir.path(), OpenMode::CreateIfMissing).unwrap();

        backend.set("t.a", Value::from(1)).unwrap();
        backend.set("t.b", Value::from("two")).unwrap();
        assert_eq!(backend.get("t.a").unwrap(), Some(Value::from(1)));
        assert_eq!(backend.get("t.missing").unwrap(), None);
        assert!(backend.contains("t.b").unwrap());

        assert!(backend.delete("t.a").unwrap());
        assert!(!backend.delete("t.a").unwrap());
        assert_eq!(backend.keys().unwrap(), vec!["t.b".to_string()]);
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        {
            let mut backend = open(dir.path(), OpenMode::CreateIfMissing).unwrap();
            backend.set("t.a", Value::from(1)).unwrap();
            backend.set("t.a", Value::from(2)).unwrap();
            backend.set("t.b", Value::from(3)).unwrap();
            backend.delete("t.b").unwrap();
            backend.close().unwrap();
        }
        let backend = open(dir.path(), OpenMode::ReadWrite).unwrap();
        assert_eq!(backend.get("t.a").unwrap(), Some(Value::from(2)));
        assert!(!backend.contains("t.b").unwrap());
    }

    #[test]
    fn prefix_scan() {
        let dir = tempdir().unwrap();
        let mut backend = open(dir.path(), OpenMode::CreateIfMissing).unwrap();
        for key in ["a.1", "a.2", "ab.1", "b.1"] {
            backend.set(key, Value::Null).unwrap();
        }
        assert_eq!(
            backend.keys_with_prefix("a.").unwrap(),
            vec!["a.1".to_string(), "a.2".to_string()]
        );
    }

    #[test]
    fn force_new_discards_content() {
        let dir = tempdir().unwrap();
        {
            let mut backend = open(dir.path(), OpenMode::CreateIfMissing).unwrap();
            backend.set("t.a", Value::from(1)).unwrap();
        }
        let backend = open(dir.path(), OpenMode::ForceNew).unwrap();
        assert!(backend.is_empty());
    }

    #[test]
    fn read_only_rejects_writes() {
        let dir = tempdir().unwrap();
        {
            let mut backend = open(dir.path(), OpenMode::CreateIfMissing).unwrap();
            backend.set("t.a", Value::from(1)).unwrap();
        }
        let mut backend = open(dir.path(), OpenMode::ReadOnly).unwrap();
        assert!(backend.is_read_only());
        assert_eq!(backend.get("t.a").unwrap(), Some(Value::from(1)));
        assert!(matches!(
            backend.set("t.b", Value::Null),
            Err(StorageError::ReadOnly)
        ));
        assert!(matches!(backend.delete("t.a"), Err(StorageError::ReadOnly)));
    }

    #[test]
    fn lock_prevents_second_writer() {
        let dir = tempdir().unwrap();
        let _first = open(dir.path(), OpenMode::CreateIfMissing).unwrap();
        assert!(matches!(
            open(dir.path(), OpenMode::CreateIfMissing),
            Err(StorageError::Locked { .. })
        ));
    }

    #[test]
    fn readers_share_the_lock() {
        let dir = tempdir().unwrap();
        open(dir.path(), OpenMode::CreateIfMissing)
            .unwrap()
            .close()
            .unwrap();

        let first = open(dir.path(), OpenMode::ReadOnly).unwrap();
        let second = open(dir.path(), OpenMode::ReadOnly).unwrap();
        assert!(first.is_read_only() && second.is_read_only());
        assert!(matches!(
            open(dir.path(), OpenMode::ReadWrite),
            Err(StorageError::Locked { .. })
        ));
    }

    #[test]
    fn lock_released_on_close() {
        let dir = tempdir().unwrap();
        let mut first = open(dir.path(), OpenMode::CreateIfMissing).unwrap();
        first.close().unwrap();
        assert!(open(dir.path(), OpenMode::CreateIfMissing).is_ok());
    }

    #[test]
    fn closed_backend_rejects_operations() {
        let dir = tempdir().unwrap();
        let mut backend = open(dir.path(), OpenMode::CreateIfMissing).unwrap();
        backend.close().unwrap();
        assert!(backend.is_closed());
        assert!(matches!(backend.get("t.a"), Err(StorageError::Closed)));
        assert!(matches!(backend.keys(), Err(StorageError::Closed)));
        assert!(matches!(
            backend.set("t.a", Value::Null),
            Err(StorageError::Closed)
        ));
        // Closing again is a no-op.
        backend.close().unwrap();
    }

    #[test]
    fn torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        {
            let mut backend = open(dir.path(), OpenMode::CreateIfMissing).unwrap();
            backend.set("t.a", Value::from(1)).unwrap();
            backend.set("t.b", Value::from(2)).unwrap();
            backend.close().unwrap();
        }
        let path = dir.path().join("db.sdb");
        let len = fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();
        drop(file);

        let backend = open(dir.path(), OpenMode::ReadWrite).unwrap();
        assert_eq!(backend.get("t.a").unwrap(), Some(Value::from(1)));
        assert!(!backend.contains("t.b").unwrap());
        assert!(fs::metadata(&path).unwrap().len() < len - 3);
    }

    #[test]
    fn corruption_before_tail_is_reported() {
        let dir = tempdir().unwrap();
        {
            let mut backend = open(dir.path(), OpenMode::CreateIfMissing).unwrap();
            backend.set("t.a", Value::from("first")).unwrap();
            backend.set("t.b", Value::from("second")).unwrap();
            backend.close().unwrap();
        }
        let path = dir.path().join("db.sdb");
        let mut bytes = fs::read(&path).unwrap();
        bytes[HEADER_SIZE + 2] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            open(dir.path(), OpenMode::ReadWrite),
            Err(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn damaged_length_is_reported_not_truncated() {
        let dir = tempdir().unwrap();
        {
            let mut backend = open(dir.path(), OpenMode::CreateIfMissing).unwrap();
            for i in 0..5 {
                backend.set(&format!("t.{i}"), Value::from(i)).unwrap();
            }
            backend.close().unwrap();
        }
        let path = dir.path().join("db.sdb");
        let mut bytes = fs::read(&path).unwrap();
        bytes[3] = 0x7f;
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            open(dir.path(), OpenMode::ReadWrite),
            Err(StorageError::Corrupted(_))
        ));
        assert_eq!(fs::read(&path).unwrap(), bytes);
    }

    #[test]
    fn damaged_last_record_is_reported_not_truncated() {
        let dir = tempdir().unwrap();
        {
            let mut backend = open(dir.path(), OpenMode::CreateIfMissing).unwrap();
            backend.set("t.a", Value::from("first")).unwrap();
            backend.set("t.b", Value::from("second")).unwrap();
            backend.close().unwrap();
        }
        let path = dir.path().join("db.sdb");
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            open(dir.path(), OpenMode::ReadWrite),
            Err(StorageError::Corrupted(_))
        ));
        assert_eq!(fs::metadata(&path).unwrap().len(), bytes.len() as u64);
    }

    #[test]
    fn compact_reclaims_dead_space() {
        let dir = tempdir().unwrap();
        let mut backend = open(dir.path(), OpenMode::CreateIfMissing).unwrap();
        for i in 0..10 {
            backend.set("t.a", Value::from(i)).unwrap();
        }
        backend.set("t.b", Value::from("keep")).unwrap();
        assert!(backend.dead_bytes() > 0);

        backend.compact().unwrap();
        assert_eq!(backend.dead_bytes(), 0);
        assert_eq!(backend.get("t.a").unwrap(), Some(Value::from(9)));
        assert_eq!(backend.get("t.b").unwrap(), Some(Value::from("keep")));

        backend.set("t.c", Value::Null).unwrap();
        backend.close().unwrap();

        let backend = open(dir.path(), OpenMode::ReadWrite).unwrap();
        assert_eq!(backend.len(), 3);
        assert!(!dir.path().join("db.sdb.tmp").exists());
    }

    #[test]
    fn close_compacts_mostly_dead_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.sdb");
        {
            let mut backend = open(dir.path(), OpenMode::CreateIfMissing).unwrap();
            for i in 0..20 {
                backend.set("t.a", Value::from(i)).unwrap();
            }
            backend.close().unwrap();
        }
        let backend = open(dir.path(), OpenMode::ReadWrite).unwrap();
        assert_eq!(backend.dead_bytes(), 0);
        assert_eq!(fs::metadata(&path).unwrap().len(), backend.live_bytes());
    }
}
