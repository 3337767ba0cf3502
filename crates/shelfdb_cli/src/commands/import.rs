//! Import command implementation.
//!
//! Loads rows into a table, one entry per row, keyed by the value of a
//! chosen column. Two input formats are read:
//!
//! - CSV with a header row (the default). Cells are converted to typed
//!   values: numbers first, then booleans, then (optionally) dates, falling
//!   back to text. Empty cells drop the field.
//! - JSON Lines, one object per line. Null fields are dropped.
//!
//! The database is created if it does not exist yet.

use super::{from_json, open_with_mode};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use shelfdb_core::{BackendKind, Database, Entry, OpenMode, Value};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tracing::{debug, info};

/// Import statistics.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportStats {
    /// Rows written.
    pub imported: usize,
    /// Rows without a key.
    pub skipped: usize,
}

/// How CSV cells become values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellConversion {
    /// Convert cells to typed values and drop empty ones. When off, every
    /// cell is stored as text, empty or not.
    pub typed: bool,
    /// Recognize dates and store them as RFC 3339 UTC text.
    pub dates: bool,
}

impl Default for CellConversion {
    fn default() -> Self {
        Self {
            typed: true,
            dates: true,
        }
    }
}

/// Runs the import command.
pub fn run(
    path: &Path,
    backend: BackendKind,
    table: &str,
    input: &Path,
    key_field: &str,
    format: &str,
    conversion: CellConversion,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Importing {:?} into {}", input, table);

    let db = open_with_mode(path, backend, OpenMode::CreateIfMissing)?;
    let reader = BufReader::new(File::open(input)?);
    let stats = match format {
        "csv" => import_csv(&db, table, reader, key_field, conversion)?,
        "jsonl" => import_json_lines(&db, table, reader, key_field)?,
        other => return Err(format!("unknown import format: {other}").into()),
    };
    db.close()?;

    println!("✓ Import complete");
    println!("  Imported: {}", stats.imported);
    println!("  Skipped:  {} (no {:?} value)", stats.skipped, key_field);
    Ok(())
}

/// Writes every CSV row read from `reader` into `table`.
///
/// The first row names the columns. The raw text of the `key_field` cell is
/// the record key; rows where it is empty are skipped, and so is every row
/// when no column is named `key_field`.
pub fn import_csv<R: Read>(
    db: &Database,
    table: &str,
    reader: R,
    key_field: &str,
    conversion: CellConversion,
) -> Result<ImportStats, Box<dyn std::error::Error>> {
    let mut reader = csv::Reader::from_reader(reader);
    let headers = reader.headers()?.clone();
    let key_column = headers.iter().position(|name| name == key_field);
    if key_column.is_none() {
        debug!(column = key_field, "key column missing from header");
    }

    let mut stats = ImportStats::default();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let key = key_column.and_then(|column| record.get(column)).unwrap_or("");
        if key.is_empty() {
            stats.skipped += 1;
            continue;
        }
        let entry: Entry = headers
            .iter()
            .zip(record.iter())
            .filter_map(|(field, cell)| {
                convert_cell(cell, conversion).map(|value| (field.to_string(), value))
            })
            .collect();
        rows.push((key.to_string(), entry));
    }

    stats.imported = write_rows(db, table, rows)?;
    Ok(stats)
}

/// Converts one CSV cell. `None` means the field is dropped.
#[must_use]
pub fn convert_cell(cell: &str, conversion: CellConversion) -> Option<Value> {
    if !conversion.typed {
        return Some(Value::Text(cell.to_string()));
    }
    if cell.is_empty() {
        return None;
    }
    let value = parse_number(cell)
        .or_else(|| parse_bool(cell))
        .or_else(|| conversion.dates.then(|| parse_date(cell)).flatten())
        .unwrap_or_else(|| Value::Text(cell.to_string()));
    Some(value)
}

/// Integers, then finite floats. Numbers written with leading zeros, such
/// as `007`, stay text.
fn parse_number(cell: &str) -> Option<Value> {
    let digits = cell.trim_start_matches(['+', '-']);
    if digits.len() > 1 && digits.starts_with('0') && digits.as_bytes()[1].is_ascii_digit() {
        return None;
    }
    if let Ok(n) = cell.parse::<i64>() {
        return Some(Value::Integer(n));
    }
    cell.parse::<f64>()
        .ok()
        .filter(|x| x.is_finite())
        .map(Value::Float)
}

fn parse_bool(cell: &str) -> Option<Value> {
    match cell {
        "true" | "True" => Some(Value::Bool(true)),
        "false" | "False" => Some(Value::Bool(false)),
        _ => None,
    }
}

/// RFC 3339 timestamps, `YYYY-MM-DD HH:MM:SS` (taken as UTC) and bare
/// `YYYY-MM-DD` dates (midnight UTC). The result orders chronologically.
fn parse_date(cell: &str) -> Option<Value> {
    let utc = if let Ok(dt) = DateTime::parse_from_rfc3339(cell) {
        dt.with_timezone(&Utc)
    } else if let Ok(naive) = NaiveDateTime::parse_from_str(cell, "%Y-%m-%d %H:%M:%S") {
        Utc.from_utc_datetime(&naive)
    } else {
        let date = NaiveDate::parse_from_str(cell, "%Y-%m-%d").ok()?;
        Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?)
    };
    Some(Value::Text(utc.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
}

/// Writes every JSON object read from `reader` into `table`.
///
/// Null fields are dropped. Rows lacking `key_field` (or holding null in it)
/// are skipped. Text keys are used as-is; other key values use their JSON
/// rendering.
pub fn import_json_lines<R: BufRead>(
    db: &Database,
    table: &str,
    reader: R,
    key_field: &str,
) -> Result<ImportStats, Box<dyn std::error::Error>> {
    let mut stats = ImportStats::default();
    let mut rows = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let json: serde_json::Value = serde_json::from_str(&line)
            .map_err(|e| format!("line {}: {e}", number + 1))?;
        let serde_json::Value::Object(object) = json else {
            return Err(format!("line {}: expected a JSON object", number + 1).into());
        };

        let key = match object.get(key_field) {
            None | Some(serde_json::Value::Null) => {
                debug!(line = number + 1, "row has no key field");
                stats.skipped += 1;
                continue;
            }
            Some(serde_json::Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
        };

        let mut entry = Entry::new();
        for (field, value) in object.iter().filter(|(_, value)| !value.is_null()) {
            let value = from_json(value).map_err(|e| format!("line {}: {e}", number + 1))?;
            entry.insert(field.clone(), value);
        }
        rows.push((key, entry));
    }

    stats.imported = write_rows(db, table, rows)?;
    Ok(stats)
}

/// Writes all rows under one batch, synced at the end.
fn write_rows(
    db: &Database,
    table: &str,
    rows: Vec<(String, Entry)>,
) -> Result<usize, Box<dyn std::error::Error>> {
    Ok(db.batch(|batch| {
        for (key, entry) in rows {
            batch.set(table, key, entry)?;
        }
        batch.request_sync();
        Ok(batch.writes())
    })?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelfdb_core::entry;

    #[test]
    fn csv_rows_become_typed_entries() {
        let db = Database::open_in_memory().unwrap();
        let input = "\
id,name,age,score,active,joined,zip
a1,ann,31,2.5,True,2024-03-01,00501
b2,bob,,-4,false,2024-03-01T10:30:00+02:00,
,nobody,1,1,true,,
";
        let stats = import_csv(&db, "people", input.as_bytes(), "id", CellConversion::default())
            .unwrap();
        assert_eq!(stats, ImportStats { imported: 2, skipped: 1 });

        let people = db.table("people").unwrap();
        assert_eq!(
            people.get("a1").unwrap(),
            entry! {
                "id" => "a1",
                "name" => "ann",
                "age" => 31,
                "score" => 2.5,
                "active" => true,
                "joined" => "2024-03-01T00:00:00Z",
                "zip" => "00501",
            }
        );
        let bob = people.get("b2").unwrap();
        assert!(!bob.contains_field("age"));
        assert!(!bob.contains_field("zip"));
        assert_eq!(bob.get("score"), Some(&Value::from(-4)));
        assert_eq!(bob.get("joined"), Some(&Value::from("2024-03-01T08:30:00Z")));
    }

    #[test]
    fn csv_without_conversion_keeps_text() {
        let db = Database::open_in_memory().unwrap();
        let input = "id,n,empty\nk,42,\n";
        let raw = CellConversion {
            typed: false,
            dates: false,
        };
        import_csv(&db, "t", input.as_bytes(), "id", raw).unwrap();
        assert_eq!(
            db.table("t").unwrap().get("k").unwrap(),
            entry! { "id" => "k", "n" => "42", "empty" => "" }
        );
    }

    #[test]
    fn csv_dates_can_be_left_as_text() {
        let no_dates = CellConversion {
            typed: true,
            dates: false,
        };
        assert_eq!(convert_cell("2024-03-01", no_dates), Some(Value::from("2024-03-01")));
        assert_eq!(convert_cell("nan", no_dates), Some(Value::from("nan")));
        assert_eq!(convert_cell("1e3", no_dates), Some(Value::from(1000.0)));
        assert_eq!(convert_cell("", no_dates), None);
    }

    #[test]
    fn csv_without_key_column_skips_everything() {
        let db = Database::open_in_memory().unwrap();
        let input = "name\nann\nbob\n";
        let stats = import_csv(&db, "t", input.as_bytes(), "id", CellConversion::default())
            .unwrap();
        assert_eq!(stats, ImportStats { imported: 0, skipped: 2 });
    }

    #[test]
    fn ragged_csv_is_an_error() {
        let db = Database::open_in_memory().unwrap();
        let input = "id,a\nk,1,2\n";
        assert!(import_csv(&db, "t", input.as_bytes(), "id", CellConversion::default()).is_err());
        assert!(db.table("t").unwrap().is_empty().unwrap());
    }

    #[test]
    fn json_rows_become_entries() {
        let db = Database::open_in_memory().unwrap();
        let input = r#"{"id": "a1", "name": "ann", "age": 31, "note": null}

{"id": 7, "name": "bob", "tags": ["x", "y"], "score": 2.5}
{"name": "no key"}
{"id": null, "name": "null key"}
"#;
        let stats = import_json_lines(&db, "people", input.as_bytes(), "id").unwrap();
        assert_eq!(stats, ImportStats { imported: 2, skipped: 2 });

        let people = db.table("people").unwrap();
        assert_eq!(people.keys().unwrap(), vec!["7".to_string(), "a1".to_string()]);
        assert_eq!(
            people.get("a1").unwrap(),
            entry! { "id" => "a1", "name" => "ann", "age" => 31 }
        );
        let bob = people.get("7").unwrap();
        assert_eq!(bob.get("score"), Some(&Value::from(2.5)));
        assert_eq!(
            bob.get("tags"),
            Some(&Value::Array(vec![Value::from("x"), Value::from("y")]))
        );
    }

    #[test]
    fn json_non_objects_are_rejected() {
        let db = Database::open_in_memory().unwrap();
        let err = import_json_lines(&db, "t", "[1, 2]\n".as_bytes(), "id").unwrap_err();
        assert!(err.to_string().contains("line 1"));
        assert!(db.table("t").unwrap().is_empty().unwrap());
    }

    #[test]
    fn json_integers_beyond_i64_are_rejected() {
        let db = Database::open_in_memory().unwrap();
        let input = "{\"id\": \"k\", \"n\": 18446744073709551615}\n";
        let err = import_json_lines(&db, "t", input.as_bytes(), "id").unwrap_err();
        assert!(err.to_string().contains("line 1"));
        assert!(db.table("t").unwrap().is_empty().unwrap());
    }
}
