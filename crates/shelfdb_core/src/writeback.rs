//! Writeback cache: pending writes held in memory until the next sync.

use crate::entry::Entry;
use std::collections::BTreeMap;

/// Pending writes keyed by composite key.
///
/// `Some(entry)` is a pending put, `None` a pending delete. The latest
/// write to a key replaces any earlier pending one.
#[derive(Debug, Default)]
pub struct WritebackCache {
    pending: BTreeMap<String, Option<Entry>>,
}

impl WritebackCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a pending put.
    pub fn put(&mut self, key: String, entry: Entry) {
        self.pending.insert(key, Some(entry));
    }

    /// Records a pending delete.
    pub fn delete(&mut self, key: String) {
        self.pending.insert(key, None);
    }

    /// Looks up a pending write.
    ///
    /// The outer `Option` says whether the key has a pending write at all;
    /// the inner one whether that write is a put.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Option<&Entry>> {
        self.pending.get(key).map(Option::as_ref)
    }

    /// Pending writes whose key starts with `prefix`, in key order.
    pub fn with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, Option<&'a Entry>)> + 'a {
        self.pending
            .range(prefix.to_string()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    /// Removes and returns the first pending write.
    pub fn pop_first(&mut self) -> Option<(String, Option<Entry>)> {
        self.pending.pop_first()
    }

    /// Removes and returns the pending write for `key`.
    pub fn take(&mut self, key: &str) -> Option<Option<Entry>> {
        self.pending.remove(key)
    }

    /// Keys of pending writes starting with `prefix`.
    #[must_use]
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.with_prefix(prefix).map(|(k, _)| k.to_string()).collect()
    }

    /// Puts a write back, unless a newer one for the same key is pending.
    pub fn restore(&mut self, key: String, write: Option<Entry>) {
        self.pending.entry(key).or_insert(write);
    }

    /// Number of pending writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
