//! Read commands: `get` and `keys`.

use super::{open, to_json};
use shelfdb_core::BackendKind;
use std::path::Path;

/// Prints the entry under `table.key` as JSON.
///
/// A key that was never written prints as an empty object.
pub fn run(
    path: &Path,
    backend: BackendKind,
    table: &str,
    key: &str,
    pretty: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = open(path, backend, false)?;
    let entry = db.table(table)?.get(key)?;
    let json = to_json(&entry.to_value());
    if pretty {
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        println!("{json}");
    }
    db.close()?;
    Ok(())
}

/// Prints every key of `table`, one per line.
pub fn keys(path: &Path, backend: BackendKind, table: &str) -> Result<(), Box<dyn std::error::Error>> {
    let db = open(path, backend, false)?;
    for key in db.table(table)?.iter()? {
        println!("{key}");
    }
    db.close()?;
    Ok(())
}
