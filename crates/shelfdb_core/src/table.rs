//! Table handles.

use crate::database::Database;
use crate::entry::Entry;
use crate::error::CoreResult;
use crate::result::QueryResult;
use shelfdb_codec::{Value, ValueKind};
use std::fmt;

/// A named partition of keyed entries inside a [`Database`].
///
/// A `Table` is a cheap handle borrowing its database; the database owns
/// all data. Keys are strings: anything implementing `ToString` is
/// accepted and normalized.
///
/// Reading a key that was never written returns an empty [`Entry`].
///
/// # Example
///
/// ```rust
/// use shelfdb_core::{entry, Database};
///
/// let db = Database::open_in_memory().unwrap();
/// let table1 = db.table("table1").unwrap();
/// table1.set(123, entry! { "field1" => "testdata", "x" => 456 }).unwrap();
///
/// let hits = table1.query("x", |v| v.as_integer() == Some(456), None).unwrap();
/// assert_eq!(&hits[0], "123");
///
/// table1.update("123", entry! { "x" => 789 }).unwrap();
/// assert!(table1.query("x", |v| v.as_integer() == Some(456), None).unwrap().is_empty());
/// ```
#[derive(Clone)]
pub struct Table<'db> {
    db: &'db Database,
    name: String,
}

impl<'db> Table<'db> {
    pub(crate) fn new(db: &'db Database, name: String) -> Self {
        Self { db, name }
    }

    /// The table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The database this table belongs to.
    #[must_use]
    pub fn database(&self) -> &'db Database {
        self.db
    }

    /// Returns the entry stored under `key`, or an empty entry if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is closed or the stored record
    /// cannot be read back as a mapping.
    pub fn get(&self, key: impl ToString) -> CoreResult<Entry> {
        Ok(self
            .db
            .load_entry(&self.name, &key.to_string())?
            .unwrap_or_default())
    }

    /// Stores `value` under `key`, replacing the previous entry.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`](crate::CoreError::Validation) if
    /// `value` is not a mapping, or a storage error if the write fails.
    pub fn set(&self, key: impl ToString, value: impl Into<Value>) -> CoreResult<()> {
        let entry = Entry::try_from(value.into())?;
        self.db.write_entry(&self.name, &key.to_string(), entry, false)
    }

    /// Like [`Table::set`], then makes at least this key durable, even in
    /// writeback mode.
    ///
    /// # Errors
    ///
    /// See [`Table::set`].
    pub fn set_with_sync(&self, key: impl ToString, value: impl Into<Value>) -> CoreResult<()> {
        let entry = Entry::try_from(value.into())?;
        self.db.write_entry(&self.name, &key.to_string(), entry, true)
    }

    /// Merges `obj` into the entry under `key` and returns the result.
    ///
    /// Fields of `obj` overwrite existing ones; other fields are kept. A
    /// missing entry starts out empty.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`](crate::CoreError::Validation) if
    /// `obj` is not a mapping, or a storage error if the write fails.
    pub fn update(&self, key: impl ToString, obj: impl Into<Value>) -> CoreResult<Entry> {
        let patch = Entry::try_from(obj.into())?.canonicalize()?;
        self.db.modify_entry(&self.name, &key.to_string(), |entry| {
            entry.merge(patch);
            entry.clone()
        })
    }

    /// Runs `f` on the entry under `key` and writes the result back, all
    /// under the write lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the read or the write fails.
    pub fn modify<F, R>(&self, key: impl ToString, f: F) -> CoreResult<R>
    where
        F: FnOnce(&mut Entry) -> R,
    {
        self.db.modify_entry(&self.name, &key.to_string(), f)
    }

    /// Deletes `key`. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is closed or the write fails.
    pub fn delete(&self, key: impl ToString) -> CoreResult<bool> {
        self.db.delete_entry(&self.name, &key.to_string())
    }

    /// Whether `key` holds an entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is closed.
    pub fn contains(&self, key: impl ToString) -> CoreResult<bool> {
        self.db.contains_entry(&self.name, &key.to_string())
    }

    /// All keys, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is closed.
    pub fn keys(&self) -> CoreResult<Vec<String>> {
        self.db.table_keys(&self.name)
    }

    /// Number of entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is closed.
    pub fn len(&self) -> CoreResult<usize> {
        Ok(self.keys()?.len())
    }

    /// Whether the table holds no entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is closed.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.keys()?.is_empty())
    }

    /// Iterates over a snapshot of the keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is closed.
    pub fn iter(&self) -> CoreResult<std::vec::IntoIter<String>> {
        Ok(self.keys()?.into_iter())
    }

    /// Every `(key, entry)` pair, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is closed or a record is unreadable.
    pub fn entries(&self) -> CoreResult<Vec<(String, Entry)>> {
        self.db.scan_table(&self.name)
    }

    /// Keys whose entry has `field` and whose value satisfies `predicate`.
    ///
    /// Entries without the field are skipped. With `checktype`, values of
    /// any other kind are skipped before `predicate` sees them. The first
    /// query on a field builds an index that later writes keep current.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is closed or the index cannot be built.
    pub fn query<F>(
        &self,
        field: &str,
        predicate: F,
        checktype: Option<ValueKind>,
    ) -> CoreResult<QueryResult<'db>>
    where
        F: Fn(&Value) -> bool,
    {
        self.select(None, field, predicate, checktype)
    }

    /// [`Table::query`] restricted to values of kind `kind`.
    ///
    /// # Errors
    ///
    /// See [`Table::query`].
    pub fn query_typed<F>(
        &self,
        field: &str,
        kind: ValueKind,
        predicate: F,
    ) -> CoreResult<QueryResult<'db>>
    where
        F: Fn(&Value) -> bool,
    {
        self.select(None, field, predicate, Some(kind))
    }

    /// Keys whose entry lacks `field` or holds null in it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is closed or a record is unreadable.
    pub fn query_none(&self, field: &str) -> CoreResult<QueryResult<'db>> {
        self.select_none(None, field)
    }

    /// Keys whose `field` holds exactly `value`, answered from the index.
    ///
    /// Unlike [`query::eq`](crate::query::eq), `1` and `1.0` are different
    /// values here.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is closed or `value` is NaN.
    pub fn query_eq(&self, field: &str, value: impl Into<Value>) -> CoreResult<QueryResult<'db>> {
        let value = value.into();
        let keys = self
            .db
            .with_index(&self.name, field, |index| index.lookup_eq(&value))??;
        Ok(QueryResult::new(self.clone(), keys.into_iter().collect()))
    }

    /// Flushes this table's pending writes and syncs the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is closed or the flush fails.
    pub fn sync(&self) -> CoreResult<()> {
        self.db.sync_table(&self.name)
    }

    /// Shared scan for [`Table::query`] and [`QueryResult::query`].
    ///
    /// Matches come from the field index; `within` narrows them to a parent
    /// result, keeping the parent's order.
    pub(crate) fn select<F>(
        &self,
        within: Option<&[String]>,
        field: &str,
        predicate: F,
        checktype: Option<ValueKind>,
    ) -> CoreResult<QueryResult<'db>>
    where
        F: Fn(&Value) -> bool,
    {
        let matched = self
            .db
            .with_index(&self.name, field, |index| index.lookup(&predicate, checktype))?;
        let keys = match within {
            Some(parent) => parent
                .iter()
                .filter(|key| matched.contains(key.as_str()))
                .cloned()
                .collect(),
            None => matched.into_iter().collect(),
        };
        Ok(QueryResult::new(self.clone(), keys))
    }

    /// Shared scan for the absent-or-null queries.
    pub(crate) fn select_none(
        &self,
        within: Option<&[String]>,
        field: &str,
    ) -> CoreResult<QueryResult<'db>> {
        let is_none = |entry: &Entry| entry.get(field).map_or(true, Value::is_null);
        let keys = match within {
            Some(parent) => {
                let mut keys = Vec::new();
                for key in parent {
                    if is_none(&self.get(key)?) {
                        keys.push(key.clone());
                    }
                }
                keys
            }
            None => self
                .entries()?
                .into_iter()
                .filter(|(_, entry)| is_none(entry))
                .map(|(key, _)| key)
                .collect(),
        };
        Ok(QueryResult::new(self.clone(), keys))
    }
}

impl fmt::Debug for Table<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table").field("name", &self.name).finish_non_exhaustive()
    }
}

impl fmt::Display for Table<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
