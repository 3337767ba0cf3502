//! Ready-made predicates for [`Table::query`](crate::Table::query).
//!
//! Each function returns a closure over the comparison operand. Ordering
//! predicates compare with [`Value::compare`] and return `false` when the
//! field's value cannot be ordered against the operand, so they are total
//! over every kind of value.
//!
//! ```rust
//! use shelfdb_core::{entry, query, Database};
//!
//! let db = Database::open_in_memory().unwrap();
//! let people = db.table("people").unwrap();
//! people.set("1", entry! { "age" => 31 }).unwrap();
//! people.set("2", entry! { "age" => 17 }).unwrap();
//!
//! let adults = people.query("age", query::gte(18), None).unwrap();
//! assert_eq!(adults.keys(), ["1"]);
//! ```

use shelfdb_codec::Value;
use std::cmp::Ordering;

fn equals(value: &Value, other: &Value) -> bool {
    value == other || value.compare(other) == Some(Ordering::Equal)
}

fn ordering(value: &Value, other: &Value) -> Option<Ordering> {
    value.compare(other)
}

/// `value == operand`. Integers and floats compare numerically.
pub fn eq(operand: impl Into<Value>) -> impl Fn(&Value) -> bool {
    let operand = operand.into();
    move |value| equals(value, &operand)
}

/// `value != operand`.
pub fn neq(operand: impl Into<Value>) -> impl Fn(&Value) -> bool {
    let operand = operand.into();
    move |value| !equals(value, &operand)
}

/// `value > operand`.
pub fn gt(operand: impl Into<Value>) -> impl Fn(&Value) -> bool {
    let operand = operand.into();
    move |value| ordering(value, &operand) == Some(Ordering::Greater)
}

/// `value < operand`.
pub fn lt(operand: impl Into<Value>) -> impl Fn(&Value) -> bool {
    let operand = operand.into();
    move |value| ordering(value, &operand) == Some(Ordering::Less)
}

/// `value >= operand`.
pub fn gte(operand: impl Into<Value>) -> impl Fn(&Value) -> bool {
    let operand = operand.into();
    move |value| matches!(ordering(value, &operand), Some(Ordering::Greater | Ordering::Equal))
}

/// `value <= operand`.
pub fn lte(operand: impl Into<Value>) -> impl Fn(&Value) -> bool {
    let operand = operand.into();
    move |value| matches!(ordering(value, &operand), Some(Ordering::Less | Ordering::Equal))
}

/// Membership of `item` in the field's value.
///
/// Text contains a text substring, an array contains an equal element, a map
/// contains a key, bytes contain a byte subsequence. Anything else contains
/// nothing.
pub fn contains(item: impl Into<Value>) -> impl Fn(&Value) -> bool {
    let item = item.into();
    move |value| value_contains(value, &item)
}

/// Negation of [`contains`].
pub fn not_contains(item: impl Into<Value>) -> impl Fn(&Value) -> bool {
    let item = item.into();
    move |value| !value_contains(value, &item)
}

fn value_contains(value: &Value, item: &Value) -> bool {
    match (value, item) {
        (Value::Text(text), Value::Text(needle)) => text.contains(needle.as_str()),
        (Value::Bytes(bytes), Value::Bytes(needle)) => {
            needle.is_empty() || bytes.windows(needle.len()).any(|w| w == needle.as_slice())
        }
        (Value::Array(items), _) => items.iter().any(|v| equals(v, item)),
        (Value::Map(pairs), _) => pairs.iter().any(|(k, _)| k == item),
        _ => false,
    }
}

/// Text or bytes starting with `prefix`.
pub fn begins_with(prefix: impl Into<Value>) -> impl Fn(&Value) -> bool {
    let prefix = prefix.into();
    move |value| value_begins_with(value, &prefix)
}

/// Negation of [`begins_with`].
pub fn not_begins_with(prefix: impl Into<Value>) -> impl Fn(&Value) -> bool {
    let prefix = prefix.into();
    move |value| !value_begins_with(value, &prefix)
}

fn value_begins_with(value: &Value, prefix: &Value) -> bool {
    match (value, prefix) {
        (Value::Text(text), Value::Text(prefix)) => text.starts_with(prefix.as_str()),
        (Value::Bytes(bytes), Value::Bytes(prefix)) => bytes.starts_with(prefix),
        _ => false,
    }
}

/// `low <= value <= high`.
pub fn between(low: impl Into<Value>, high: impl Into<Value>) -> impl Fn(&Value) -> bool {
    let (low, high) = (low.into(), high.into());
    move |value| value_between(value, &low, &high)
}

/// Negation of [`between`]. Values that cannot be ordered against the
/// bounds are outside them.
pub fn not_between(low: impl Into<Value>, high: impl Into<Value>) -> impl Fn(&Value) -> bool {
    let (low, high) = (low.into(), high.into());
    move |value| !value_between(value, &low, &high)
}

fn value_between(value: &Value, low: &Value, high: &Value) -> bool {
    matches!(ordering(low, value), Some(Ordering::Less | Ordering::Equal))
        && matches!(ordering(value, high), Some(Ordering::Less | Ordering::Equal))
}

/// The field's value is one of `options`.
pub fn in_<I, V>(options: I) -> impl Fn(&Value) -> bool
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    let options: Vec<Value> = options.into_iter().map(Into::into).collect();
    move |value| options.iter().any(|option| equals(value, option))
}

/// The field's value is none of `options`.
pub fn not_in<I, V>(options: I) -> impl Fn(&Value) -> bool
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    let options: Vec<Value> = options.into_iter().map(Into::into).collect();
    move |value| !options.iter().any(|option| equals(value, option))
}

/// Null check, for use with [`QueryResult::query`](crate::QueryResult::query).
pub fn is_null() -> impl Fn(&Value) -> bool {
    Value::is_null
}
