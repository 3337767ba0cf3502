//! Field indexes: reverse lookup from a field's values to the keys holding them.
//!
//! An index is built the first time a table is queried on a field and is
//! then maintained on every write to that table, so it never lags behind
//! the stored data.

use crate::entry::Entry;
use crate::error::CoreResult;
use shelfdb_codec::{to_canonical_cbor, Value, ValueKind};
use std::collections::hash_map::Entry as Slot;
use std::collections::{BTreeSet, HashMap};

/// All keys sharing one field value.
#[derive(Debug)]
struct Bucket {
    value: Value,
    keys: BTreeSet<String>,
}

/// Index over one field of one table.
///
/// Values are bucketed by their canonical encoding, so equal values share a
/// bucket and a predicate runs once per distinct value rather than once per
/// record. Keys whose entry lacks the field are not indexed.
#[derive(Debug, Default)]
pub struct FieldIndex {
    /// Encoded value to bucket.
    buckets: HashMap<Vec<u8>, Bucket>,
    /// Key to the encoded value it is filed under.
    reverse: HashMap<String, Vec<u8>>,
}

impl FieldIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index over `field` from `(key, entry)` pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if a field value cannot be encoded (a NaN float).
    pub fn build<'a, I>(field: &str, entries: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = (String, &'a Entry)>,
    {
        let mut index = Self::new();
        for (key, entry) in entries {
            index.update(key, entry.get(field))?;
        }
        Ok(index)
    }

    /// Files `key` under `value`, or unfiles it when `value` is `None`.
    ///
    /// The key is first removed from whatever bucket held it before.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be encoded. The index is left
    /// unchanged in that case.
    pub fn update(&mut self, key: String, value: Option<&Value>) -> CoreResult<()> {
        let encoded = value.map(to_canonical_cbor).transpose()?;
        self.remove(&key);
        if let (Some(value), Some(encoded)) = (value, encoded) {
            self.buckets
                .entry(encoded.clone())
                .or_insert_with(|| Bucket {
                    value: value.clone(),
                    keys: BTreeSet::new(),
                })
                .keys
                .insert(key.clone());
            self.reverse.insert(key, encoded);
        }
        Ok(())
    }

    /// Unfiles `key`. Returns whether it was indexed.
    pub fn remove(&mut self, key: &str) -> bool {
        let Some(encoded) = self.reverse.remove(key) else {
            return false;
        };
        if let Some(bucket) = self.buckets.get_mut(&encoded) {
            bucket.keys.remove(key);
            if bucket.keys.is_empty() {
                self.buckets.remove(&encoded);
            }
        }
        true
    }

    /// Keys whose value satisfies `predicate`, in ascending order.
    ///
    /// Buckets whose value is not of kind `checktype` are skipped without
    /// calling the predicate.
    pub fn lookup<F>(&self, predicate: F, checktype: Option<ValueKind>) -> BTreeSet<String>
    where
        F: Fn(&Value) -> bool,
    {
        self.buckets
            .values()
            .filter(|bucket| checktype.map_or(true, |kind| bucket.value.kind() == kind))
            .filter(|bucket| predicate(&bucket.value))
            .flat_map(|bucket| bucket.keys.iter().cloned())
            .collect()
    }

    /// Keys whose value is exactly `value` (same kind and encoding).
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be encoded.
    pub fn lookup_eq(&self, value: &Value) -> CoreResult<BTreeSet<String>> {
        let encoded = to_canonical_cbor(value)?;
        Ok(self
            .buckets
            .get(&encoded)
            .map(|bucket| bucket.keys.clone())
            .unwrap_or_default())
    }

    /// Number of distinct values.
    #[must_use]
    pub fn distinct_values(&self) -> usize {
        self.buckets.len()
    }

    /// Number of indexed keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.reverse.len()
    }

    /// Whether no key is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }
}

/// Size of one index, as reported by [`Database::index_stats`](crate::Database::index_stats).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    /// Table name.
    pub table: String,
    /// Indexed field.
    pub field: String,
    /// Number of distinct values.
    pub distinct_values: usize,
    /// Number of indexed keys.
    pub keys: usize,
}

/// Every index of a database, keyed by `(table, field)`.
#[derive(Debug, Default)]
pub struct IndexRegistry {
    indexes: HashMap<(String, String), FieldIndex>,
}

impl IndexRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index on `table.field`, if built.
    #[must_use]
    pub fn get(&self, table: &str, field: &str) -> Option<&FieldIndex> {
        self.indexes.get(&(table.to_string(), field.to_string()))
    }

    /// Whether `table.field` is indexed.
    #[must_use]
    pub fn contains(&self, table: &str, field: &str) -> bool {
        self.get(table, field).is_some()
    }

    /// Registers a built index, replacing any previous one.
    pub fn insert(&mut self, table: &str, field: &str, index: FieldIndex) {
        self.indexes
            .insert((table.to_string(), field.to_string()), index);
    }

    /// Returns the index on `table.field`, building it with `build` if absent.
    ///
    /// # Errors
    ///
    /// Returns whatever `build` fails with; nothing is registered then.
    pub fn get_or_build<F>(&mut self, table: &str, field: &str, build: F) -> CoreResult<&FieldIndex>
    where
        F: FnOnce() -> CoreResult<FieldIndex>,
    {
        match self.indexes.entry((table.to_string(), field.to_string())) {
            Slot::Occupied(slot) => Ok(slot.into_mut()),
            Slot::Vacant(slot) => Ok(slot.insert(build()?)),
        }
    }

    /// Updates every index of `table` after `key` was written.
    ///
    /// `entry` is the new record, or `None` when the key was deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if an indexed field value cannot be encoded.
    pub fn on_write(&mut self, table: &str, key: &str, entry: Option<&Entry>) -> CoreResult<()> {
        for ((indexed_table, field), index) in &mut self.indexes {
            if indexed_table != table {
                continue;
            }
            match entry {
                Some(entry) => index.update(key.to_string(), entry.get(field))?,
                None => {
                    index.remove(key);
                }
            }
        }
        Ok(())
    }

    /// Drops every index.
    pub fn clear(&mut self) {
        self.indexes.clear();
    }

    /// Number of indexes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    /// Whether no index has been built.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Per-index sizes, ordered by table then field.
    #[must_use]
    pub fn stats(&self) -> Vec<IndexStats> {
        let mut stats: Vec<IndexStats> = self
            .indexes
            .iter()
            .map(|((table, field), index)| IndexStats {
                table: table.clone(),
                field: field.clone(),
                distinct_values: index.distinct_values(),
                keys: index.len(),
            })
            .collect();
        stats.sort_by(|a, b| (&a.table, &a.field).cmp(&(&b.table, &b.field)));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry;

    fn sample() -> Vec<(String, Entry)> {
        vec![
            ("1".to_string(), entry! { "x" => 10, "tag" => "a" }),
            ("2".to_string(), entry! { "x" => 20 }),
            ("3".to_string(), entry! { "x" => 10 }),
            ("4".to_string(), entry! { "y" => 1 }),
        ]
    }

    fn build(field: &str) -> FieldIndex {
        let entries = sample();
        FieldIndex::build(field, entries.iter().map(|(k, e)| (k.clone(), e))).unwrap()
    }

    fn keys(set: BTreeSet<String>) -> Vec<String> {
        set.into_iter().collect()
    }

    #[test]
    fn build_skips_missing_fields() {
        let index = build("x");
        assert_eq!(index.len(), 3);
        assert_eq!(index.distinct_values(), 2);
    }

    #[test]
    fn predicate_runs_once_per_value() {
        let index = build("x");
        let calls = std::cell::Cell::new(0);
        let found = index.lookup(
            |v| {
                calls.set(calls.get() + 1);
                v.as_integer() == Some(10)
            },
            None,
        );
        assert_eq!(keys(found), vec!["1".to_string(), "3".to_string()]);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn checktype_skips_other_kinds() {
        let mut index = build("x");
        index.update("5".to_string(), Some(&Value::from("ten"))).unwrap();
        let found = index.lookup(|_| true, Some(ValueKind::Text));
        assert_eq!(keys(found), vec!["5".to_string()]);
    }

    #[test]
    fn update_moves_key_between_buckets() {
        let mut index = build("x");
        index.update("1".to_string(), Some(&Value::from(20))).unwrap();
        assert_eq!(
            keys(index.lookup_eq(&Value::from(10)).unwrap()),
            vec!["3".to_string()]
        );
        assert_eq!(
            keys(index.lookup_eq(&Value::from(20)).unwrap()),
            vec!["1".to_string(), "2".to_string()]
        );

        index.update("3".to_string(), None).unwrap();
        assert!(index.lookup_eq(&Value::from(10)).unwrap().is_empty());
        assert_eq!(index.distinct_values(), 1);
    }

    #[test]
    fn nan_update_leaves_index_unchanged() {
        let mut index = build("x");
        assert!(index
            .update("1".to_string(), Some(&Value::Float(f64::NAN)))
            .is_err());
        assert_eq!(
            keys(index.lookup_eq(&Value::from(10)).unwrap()),
            vec!["1".to_string(), "3".to_string()]
        );
    }

    #[test]
    fn registry_on_write_touches_only_table() {
        let mut registry = IndexRegistry::new();
        registry.insert("t", "x", build("x"));
        registry.insert("other", "x", build("x"));

        registry
            .on_write("t", "9", Some(&entry! { "x" => 10 }))
            .unwrap();
        registry.on_write("t", "1", None).unwrap();

        let t = registry.get("t", "x").unwrap();
        assert_eq!(
            keys(t.lookup_eq(&Value::from(10)).unwrap()),
            vec!["3".to_string(), "9".to_string()]
        );
        let other = registry.get("other", "x").unwrap();
        assert_eq!(other.len(), 3);
    }

    #[test]
    fn get_or_build_builds_once() {
        let mut registry = IndexRegistry::new();
        let calls = std::cell::Cell::new(0);
        for _ in 0..2 {
            let index = registry
                .get_or_build("t", "x", || {
                    calls.set(calls.get() + 1);
                    Ok(build("x"))
                })
                .unwrap();
            assert_eq!(index.len(), 3);
        }
        assert_eq!(calls.get(), 1);

        let failed = registry.get_or_build("t", "y", || {
            Err(crate::CoreError::validation("boom"))
        });
        assert!(failed.is_err());
        assert!(!registry.contains("t", "y"));
    }

    #[test]
    fn registry_stats_and_clear() {
        let mut registry = IndexRegistry::new();
        registry.insert("t", "x", build("x"));
        registry.insert("t", "tag", build("tag"));
        let stats = registry.stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].field, "tag");
        assert_eq!(stats[1].keys, 3);

        registry.clear();
        assert!(registry.is_empty());
        assert!(!registry.contains("t", "x"));
    }
}
