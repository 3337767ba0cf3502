//! The backend together with its writeback cache.

use crate::entry::Entry;
use crate::error::CoreResult;
use crate::writeback::WritebackCache;
use shelfdb_codec::{from_cbor, to_canonical_cbor, Value};
use shelfdb_storage::Backend;
use std::collections::BTreeSet;

/// Storage state guarded by the database's store lock.
///
/// Reads consult pending writes first, then the backend. With writeback off
/// every write goes straight to the backend.
pub(crate) struct Store {
    backend: Box<dyn Backend>,
    cache: Option<WritebackCache>,
    serialize: bool,
}

impl Store {
    pub(crate) fn new(backend: Box<dyn Backend>, writeback: bool, serialize: bool) -> Self {
        Self {
            backend,
            cache: writeback.then(WritebackCache::new),
            serialize,
        }
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub(crate) fn is_writeback(&self) -> bool {
        self.cache.is_some()
    }

    pub(crate) fn serializes(&self) -> bool {
        self.serialize
    }

    pub(crate) fn pending(&self) -> usize {
        self.cache.as_ref().map_or(0, WritebackCache::len)
    }

    pub(crate) fn load(&self, key: &str) -> CoreResult<Option<Entry>> {
        if let Some(write) = self.cache.as_ref().and_then(|c| c.get(key)) {
            return Ok(write.cloned());
        }
        match self.backend.get(key)? {
            Some(stored) => Ok(Some(decode_entry(stored)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn contains(&self, key: &str) -> CoreResult<bool> {
        if let Some(write) = self.cache.as_ref().and_then(|c| c.get(key)) {
            return Ok(write.is_some());
        }
        Ok(self.backend.contains(key)?)
    }

    /// Live keys starting with `prefix`, ascending.
    pub(crate) fn keys_with_prefix(&self, prefix: &str) -> CoreResult<Vec<String>> {
        let stored = self.backend.keys_with_prefix(prefix)?;
        let Some(cache) = self.cache.as_ref().filter(|c| !c.is_empty()) else {
            return Ok(stored);
        };
        let mut keys: BTreeSet<String> = stored.into_iter().collect();
        for (key, write) in cache.with_prefix(prefix) {
            if write.is_some() {
                keys.insert(key.to_string());
            } else {
                keys.remove(key);
            }
        }
        Ok(keys.into_iter().collect())
    }

    /// Stages or writes `entry` in canonical form and returns that form.
    /// Entries the codec cannot round-trip are rejected up front, whatever
    /// the backend, so a pending write can always be flushed.
    pub(crate) fn put(&mut self, key: String, entry: Entry) -> CoreResult<Entry> {
        let entry = entry.canonicalize()?;
        match self.cache.as_mut() {
            Some(cache) => cache.put(key, entry.clone()),
            None => write_through(self.backend.as_mut(), self.serialize, &key, Some(&entry))?,
        }
        Ok(entry)
    }

    pub(crate) fn remove(&mut self, key: &str) -> CoreResult<bool> {
        if self.cache.is_none() {
            return Ok(self.backend.delete(key)?);
        }
        let existed = self.contains(key)?;
        if let Some(cache) = self.cache.as_mut() {
            cache.delete(key.to_string());
        }
        Ok(existed)
    }

    /// Writes every pending write to the backend. Returns how many were written.
    pub(crate) fn flush(&mut self) -> CoreResult<usize> {
        let Some(cache) = self.cache.as_mut() else {
            return Ok(0);
        };
        let mut flushed = 0;
        while let Some((key, write)) = cache.pop_first() {
            if let Err(e) = write_through(self.backend.as_mut(), self.serialize, &key, write.as_ref()) {
                cache.restore(key, write);
                return Err(e);
            }
            flushed += 1;
        }
        Ok(flushed)
    }

    /// Writes the pending writes whose key starts with `prefix`.
    pub(crate) fn flush_prefix(&mut self, prefix: &str) -> CoreResult<usize> {
        let Some(cache) = self.cache.as_mut() else {
            return Ok(0);
        };
        let mut flushed = 0;
        for key in cache.keys_with_prefix(prefix) {
            let Some(write) = cache.take(&key) else {
                continue;
            };
            if let Err(e) = write_through(self.backend.as_mut(), self.serialize, &key, write.as_ref()) {
                cache.restore(key, write);
                return Err(e);
            }
            flushed += 1;
        }
        Ok(flushed)
    }

    /// Writes the pending write for exactly `key`, if any, and syncs the backend.
    pub(crate) fn sync_key(&mut self, key: &str) -> CoreResult<()> {
        if let Some(cache) = self.cache.as_mut() {
            if let Some(write) = cache.take(key) {
                if let Err(e) =
                    write_through(self.backend.as_mut(), self.serialize, key, write.as_ref())
                {
                    cache.restore(key.to_string(), write);
                    return Err(e);
                }
            }
        }
        Ok(self.backend.sync()?)
    }

    /// Flushes pending writes, then the backend's own buffers.
    pub(crate) fn sync(&mut self) -> CoreResult<()> {
        let flushed = self.flush()?;
        self.backend.sync()?;
        tracing::debug!(flushed, backend = %self.backend.describe(), "synced");
        Ok(())
    }

    /// Like [`Store::sync`], limited to keys starting with `prefix`.
    pub(crate) fn sync_prefix(&mut self, prefix: &str) -> CoreResult<()> {
        let flushed = self.flush_prefix(prefix)?;
        self.backend.sync()?;
        tracing::debug!(flushed, prefix, "synced table");
        Ok(())
    }

    pub(crate) fn compact(&mut self) -> CoreResult<()> {
        self.flush()?;
        Ok(self.backend.compact()?)
    }

    /// Flushes and closes the backend. The backend is closed even when the
    /// flush fails; the first error is returned.
    pub(crate) fn close(&mut self) -> CoreResult<()> {
        let flushed = self.flush();
        let closed = self.backend.close();
        flushed?;
        Ok(closed?)
    }
}

/// Decodes a stored value into an entry, validating that it is a mapping.
pub(crate) fn decode_entry(stored: Value) -> CoreResult<Entry> {
    match stored {
        Value::Bytes(bytes) => Entry::try_from(from_cbor(&bytes)?),
        other => Entry::try_from(other),
    }
}

fn encode_entry(entry: &Entry, serialize: bool) -> CoreResult<Value> {
    let value = entry.to_value();
    if serialize {
        Ok(Value::Bytes(to_canonical_cbor(&value)?))
    } else {
        Ok(value)
    }
}

fn write_through(
    backend: &mut dyn Backend,
    serialize: bool,
    key: &str,
    write: Option<&Entry>,
) -> CoreResult<()> {
    match write {
        Some(entry) => backend.set(key, encode_entry(entry, serialize)?)?,
        None => {
            backend.delete(key)?;
        }
    }
    Ok(())
}
