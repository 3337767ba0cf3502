//! Query results.

use crate::entry::Entry;
use crate::error::CoreResult;
use crate::table::Table;
use shelfdb_codec::{Value, ValueKind};
use std::fmt;
use std::ops::Index;

/// Ordered set of matching keys from one table.
///
/// A result is a snapshot: later writes to the table do not change it.
/// Narrowing it with another query only ever drops keys, and keeps the
/// order of the keys that remain. Writes through a result go to the
/// underlying table.
#[derive(Clone)]
pub struct QueryResult<'db> {
    table: Table<'db>,
    keys: Vec<String>,
}

impl<'db> QueryResult<'db> {
    pub(crate) fn new(table: Table<'db>, keys: Vec<String>) -> Self {
        Self { table, keys }
    }

    /// The table the keys belong to.
    #[must_use]
    pub fn table(&self) -> &Table<'db> {
        &self.table
    }

    /// Matching keys, in order.
    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Consumes the result, returning its keys.
    #[must_use]
    pub fn into_keys(self) -> Vec<String> {
        self.keys
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether nothing matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key at position `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.keys.get(index).map(String::as_str)
    }

    /// Whether `key` is part of the result.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }

    /// Iterates over the keys.
    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.keys.iter()
    }

    /// Current entry for `key`, read from the table.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is closed or the record is unreadable.
    pub fn entry(&self, key: impl ToString) -> CoreResult<Entry> {
        self.table.get(key)
    }

    /// Current entry of the key at position `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is closed or the record is unreadable.
    pub fn entry_at(&self, index: usize) -> CoreResult<Option<Entry>> {
        self.get(index).map(|key| self.table.get(key)).transpose()
    }

    /// Current `(key, entry)` pairs, in result order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is closed or a record is unreadable.
    pub fn entries(&self) -> CoreResult<Vec<(String, Entry)>> {
        self.keys
            .iter()
            .map(|key| Ok((key.clone(), self.table.get(key)?)))
            .collect()
    }

    /// Narrows the result to keys whose `field` satisfies `predicate`.
    ///
    /// # Errors
    ///
    /// See [`Table::query`].
    pub fn query<F>(
        &self,
        field: &str,
        predicate: F,
        checktype: Option<ValueKind>,
    ) -> CoreResult<QueryResult<'db>>
    where
        F: Fn(&Value) -> bool,
    {
        self.table
            .select(Some(&self.keys), field, predicate, checktype)
    }

    /// [`QueryResult::query`] restricted to values of kind `kind`.
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
        self.table
            .select(Some(&self.keys), field, predicate, Some(kind))
    }

    /// Narrows the result to keys whose entry lacks `field` or holds null.
    ///
    /// # Errors
    ///
    /// See [`Table::query_none`].
    pub fn query_none(&self, field: &str) -> CoreResult<QueryResult<'db>> {
        self.table.select_none(Some(&self.keys), field)
    }

    /// Same as [`Table::set`].
    ///
    /// # Errors
    ///
    /// See [`Table::set`].
    pub fn set(&self, key: impl ToString, value: impl Into<Value>) -> CoreResult<()> {
        self.table.set(key, value)
    }

    /// Same as [`Table::update`].
    ///
    /// # Errors
    ///
    /// See [`Table::update`].
    pub fn update(&self, key: impl ToString, obj: impl Into<Value>) -> CoreResult<Entry> {
        self.table.update(key, obj)
    }

    /// Same as [`Table::modify`].
    ///
    /// # Errors
    ///
    /// See [`Table::modify`].
    pub fn modify<F, R>(&self, key: impl ToString, f: F) -> CoreResult<R>
    where
        F: FnOnce(&mut Entry) -> R,
    {
        self.table.modify(key, f)
    }

    /// Same as [`Table::delete`]. The key stays in this result.
    ///
    /// # Errors
    ///
    /// See [`Table::delete`].
    pub fn delete(&self, key: impl ToString) -> CoreResult<bool> {
        self.table.delete(key)
    }
}

impl Index<usize> for QueryResult<'_> {
    type Output = str;

    fn index(&self, index: usize) -> &str {
        &self.keys[index]
    }
}

impl<'a> IntoIterator for &'a QueryResult<'_> {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}

impl IntoIterator for QueryResult<'_> {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.into_iter()
    }
}

impl fmt::Debug for QueryResult<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResult")
            .field("table", &self.table.name())
            .field("keys", &self.keys)
            .finish()
    }
}

impl fmt::Display for QueryResult<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.table.name(), self.keys.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use crate::{entry, query, Database};
    use shelfdb_codec::ValueKind;

    fn people(db: &Database) -> crate::Table<'_> {
        let t = db.table("people").unwrap();
        t.set("1", entry! { "name" => "ann", "age" => 31, "city" => "oslo" }).unwrap();
        t.set("2", entry! { "name" => "bob", "age" => 17, "city" => "oslo" }).unwrap();
        t.set("3", entry! { "name" => "cid", "age" => 45 }).unwrap();
        t.set("4", entry! { "name" => "dee", "age" => "unknown", "city" => "rome" }).unwrap();
        t
    }

    #[test]
    fn narrowing_is_a_subset() {
        let db = Database::open_in_memory().unwrap();
        let t = people(&db);
        let adults = t.query("age", query::gte(18), None).unwrap();
        assert_eq!(adults.keys(), ["1", "3"]);

        let oslo_adults = adults.query("city", query::eq("oslo"), None).unwrap();
        assert_eq!(oslo_adults.keys(), ["1"]);
        assert!(oslo_adults.iter().all(|k| adults.contains(k)));
    }

    #[test]
    fn narrowing_query_none() {
        let db = Database::open_in_memory().unwrap();
        let t = people(&db);
        let adults = t.query("age", query::gte(18), None).unwrap();
        assert_eq!(adults.query_none("city").unwrap().keys(), ["3"]);
    }

    #[test]
    fn narrowing_keeps_parent_order_and_type() {
        let db = Database::open_in_memory().unwrap();
        let t = people(&db);
        let named = t.query("name", |_| true, None).unwrap();
        let numeric = named.query_typed("age", ValueKind::Integer, |_| true).unwrap();
        assert_eq!(numeric.keys(), ["1", "2", "3"]);
    }

    #[test]
    fn result_is_a_snapshot() {
        let db = Database::open_in_memory().unwrap();
        let t = people(&db);
        let adults = t.query("age", query::gte(18), None).unwrap();
        adults.update("3", entry! { "age" => 12 }).unwrap();
        assert!(adults.contains("3"));
        assert_eq!(adults.entry("3").unwrap().get("age").unwrap().as_integer(), Some(12));
        assert!(!adults.query("age", query::gte(18), None).unwrap().contains("3"));
    }

    #[test]
    fn writes_route_to_table() {
        let db = Database::open_in_memory().unwrap();
        let t = people(&db);
        let r = t.query("city", query::eq("rome"), None).unwrap();
        r.set("5", entry! { "city" => "rome" }).unwrap();
        r.modify("4", |e| {
            e.insert("visited", true);
        })
        .unwrap();
        assert!(r.delete("1").unwrap());

        assert!(t.contains("5").unwrap());
        assert!(!t.contains("1").unwrap());
        assert_eq!(t.get("4").unwrap().get("visited").unwrap().as_bool(), Some(true));
    }

    #[test]
    fn indexing_and_display() {
        let db = Database::open_in_memory().unwrap();
        let t = people(&db);
        let r = t.query("city", query::eq("oslo"), None).unwrap();
        assert_eq!(&r[0], "1");
        assert_eq!(r.get(1), Some("2"));
        assert_eq!(r.get(2), None);
        assert_eq!(r.to_string(), "people[1, 2]");
        assert_eq!(r.entry_at(1).unwrap().unwrap().get("name").unwrap().as_text(), Some("bob"));
        assert_eq!(r.entries().unwrap().len(), 2);
        let collected: Vec<String> = r.clone().into_iter().collect();
        assert_eq!(collected, r.into_keys());
    }
}
