//! In-memory backend for tests and scratch databases.

use crate::backend::Backend;
use crate::error::{StorageError, StorageResult};
use shelfdb_codec::Value;
use std::collections::BTreeMap;

/// A volatile backend holding native values in a sorted map.
///
/// Nothing is persisted: `sync` only checks that the backend is still open.
///
/// # Example
///
/// ```rust
/// use shelfdb_storage::{Backend, InMemoryBackend};
/// use shelfdb_codec::Value;
///
/// let mut backend = InMemoryBackend::new();
/// backend.set("t.1", Value::from(7)).unwrap();
/// assert_eq!(backend.get("t.1").unwrap(), Some(Value::from(7)));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: BTreeMap<String, Value>,
    closed: bool,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend pre-populated with `data`.
    ///
    /// Useful for testing.
    #[must_use]
    pub fn with_data(data: BTreeMap<String, Value>) -> Self {
        Self {
            data,
            closed: false,
        }
    }

    /// Returns a copy of everything stored.
    #[must_use]
    pub fn data(&self) -> BTreeMap<String, Value> {
        self.data.clone()
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

impl Backend for InMemoryBackend {
    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        self.ensure_open()?;
        Ok(self.data.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> StorageResult<()> {
        self.ensure_open()?;
        self.data.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&mut self, key: &str) -> StorageResult<bool> {
        self.ensure_open()?;
        Ok(self.data.remove(key).is_some())
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
        self.ensure_open()
    }

    fn close(&mut self) -> StorageResult<()> {
        self.closed = true;
        Ok(())
    }

    fn needs_serialization(&self) -> bool {
        false
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
