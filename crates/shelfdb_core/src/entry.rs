//! The record type stored under each key.

use crate::error::{CoreError, CoreResult};
use shelfdb_codec::{canonicalize, Value};
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

/// A record: a mapping from field name to [`Value`].
///
/// Tables return an empty `Entry` for keys that were never written, so
/// callers can always read, modify and write back without checking for
/// existence first. [`Entry::get_or`] extends the same idea to fields.
///
/// # Example
///
/// ```rust
/// use shelfdb_core::{entry, Entry};
/// use shelfdb_codec::Value;
///
/// let mut e = entry! { "name" => "Ada", "age" => 36 };
/// e.merge(entry! { "age" => 37 });
/// assert_eq!(e.get("age"), Some(&Value::from(37)));
/// assert_eq!(e.get_or("email", ""), Value::from(""));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    fields: BTreeMap<String, Value>,
}

impl Entry {
    /// Creates an empty entry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of `field`, if present.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Returns the value of `field`, or `default` when it is absent.
    pub fn get_or(&self, field: &str, default: impl Into<Value>) -> Value {
        match self.fields.get(field) {
            Some(value) => value.clone(),
            None => default.into(),
        }
    }

    /// Sets `field`, returning its previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(field.into(), value.into())
    }

    /// Removes `field`, returning its value.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Whether `field` is present (even if it holds null).
    #[must_use]
    pub fn contains_field(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Shallow merge: every field of `other` overwrites the field of the
    /// same name here. Fields absent from `other` are left untouched.
    pub fn merge(&mut self, other: Entry) {
        self.fields.extend(other.fields);
    }

    /// Iterates over fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Field names in order.
    #[must_use]
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the entry has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Consumes the entry, returning the underlying map.
    #[must_use]
    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.fields
    }

    /// Converts the entry into a map [`Value`] with canonically ordered keys.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::from(self.clone())
    }

    /// Puts every field value in the form it reads back as from storage:
    /// nested map pairs ordered by encoded key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Codec`] for NaN floats, map keys that are not
    /// text or integers, and duplicate map keys.
    pub fn canonicalize(self) -> CoreResult<Self> {
        self.fields
            .into_iter()
            .map(|(name, value)| -> CoreResult<(String, Value)> {
                Ok((name, canonicalize(value)?))
            })
            .collect::<CoreResult<BTreeMap<_, _>>>()
            .map(Self::from)
    }

    /// Validates that `value` is a record and converts it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] when `value` is not a map with text keys.
    pub fn from_value(value: Value) -> CoreResult<Self> {
        Self::try_from(value)
    }
}

impl From<BTreeMap<String, Value>> for Entry {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Entry {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl IntoIterator for Entry {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<'a> IntoIterator for &'a Entry {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

impl TryFrom<Value> for Entry {
    type Error = CoreError;

    fn try_from(value: Value) -> CoreResult<Self> {
        let Value::Map(pairs) = value else {
            return Err(CoreError::not_a_mapping(value.kind()));
        };
        let mut fields = BTreeMap::new();
        for (key, field_value) in pairs {
            match key {
                Value::Text(name) => {
                    fields.insert(name, field_value);
                }
                other => {
                    return Err(CoreError::validation(format!(
                        "field names must be text, got {}",
                        other.kind()
                    )))
                }
            }
        }
        Ok(Self { fields })
    }
}

impl From<Entry> for Value {
    fn from(entry: Entry) -> Self {
        Value::map(
            entry
                .fields
                .into_iter()
                .map(|(k, v)| (Value::Text(k), v))
                .collect(),
        )
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

/// Builds an [`Entry`] from `field => value` pairs.
///
/// ```rust
/// use shelfdb_core::entry;
///
/// let e = entry! { "field1" => "testdata", "x" => 456 };
/// assert_eq!(e.len(), 2);
/// ```
#[macro_export]
macro_rules! entry {
    () => {
        $crate::Entry::new()
    };
    ($($field:expr => $value:expr),+ $(,)?) => {{
        let mut entry = $crate::Entry::new();
        $(
            entry.insert($field, $value);
        )+
        entry
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_and_default() {
        let e = entry! { "a" => 1 };
        assert_eq!(e.get("a"), Some(&Value::from(1)));
        assert_eq!(e.get("b"), None);
        assert_eq!(e.get_or("b", 0), Value::from(0));
        assert_eq!(e.get_or("a", 0), Value::from(1));
    }

    #[test]
    fn merge_is_shallow_overwrite() {
        let mut e = entry! { "a" => 1, "b" => 2 };
        e.merge(entry! { "b" => 3, "c" => 4 });
        assert_eq!(e, entry! { "a" => 1, "b" => 3, "c" => 4 });
    }

    #[test]
    fn insert_remove() {
        let mut e = Entry::new();
        assert!(e.is_empty());
        assert_eq!(e.insert("x", "one"), None);
        assert_eq!(e.insert("x", "two"), Some(Value::from("one")));
        assert!(e.contains_field("x"));
        assert_eq!(e.remove("x"), Some(Value::from("two")));
        assert!(!e.contains_field("x"));
    }

    #[test]
    fn null_field_is_present() {
        let e = entry! { "x" => Value::Null };
        assert!(e.contains_field("x"));
        assert_eq!(e.get_or("x", 5), Value::Null);
    }

    #[test]
    fn value_conversion() {
        let e = entry! { "name" => "Ada", "n" => 3 };
        let value: Value = e.clone().into();
        assert!(value.is_map());
        assert_eq!(Entry::try_from(value).unwrap(), e);
    }

    #[test]
    fn non_mapping_rejected() {
        assert!(matches!(
            Entry::try_from(Value::from(5)),
            Err(CoreError::Validation { .. })
        ));
        let int_keys = Value::map(vec![(Value::from(1), Value::Null)]);
        assert!(matches!(
            Entry::from_value(int_keys),
            Err(CoreError::Validation { .. })
        ));
    }

    #[test]
    fn from_iterator_and_fields() {
        let e: Entry = vec![("b", 2), ("a", 1)].into_iter().collect();
        assert_eq!(e.field_names(), vec!["a", "b"]);
        let collected: Vec<(&str, &Value)> = e.fields().collect();
        assert_eq!(collected[1], ("b", &Value::from(2)));
        assert_eq!(e.len(), 2);
    }

    #[test]
    fn display() {
        let e = entry! { "a" => 1 };
        assert_eq!(e.to_string(), "{\"a\": 1}");
        assert_eq!(entry! {}.to_string(), "{}");
    }
}
