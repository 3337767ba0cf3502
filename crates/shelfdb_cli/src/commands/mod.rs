//! CLI command implementations.

pub mod backup;
pub mod compact;
pub mod get;
pub mod import;
pub mod inspect;
pub mod verify;

use shelfdb_codec::Value;
use shelfdb_core::{BackendKind, Config, Database, OpenMode};
use std::path::Path;

/// Opens the existing database at `path`, read-only unless `writable`.
pub fn open(
    path: &Path,
    backend: BackendKind,
    writable: bool,
) -> Result<Database, Box<dyn std::error::Error>> {
    let mode = if writable {
        OpenMode::ReadWrite
    } else {
        OpenMode::ReadOnly
    };
    open_with_mode(path, backend, mode)
}

/// Opens the database at `path` in `mode`.
pub fn open_with_mode(
    path: &Path,
    backend: BackendKind,
    mode: OpenMode,
) -> Result<Database, Box<dyn std::error::Error>> {
    if backend == BackendKind::InMemory {
        return Err("the memory backend has nothing on disk to open".into());
    }
    Ok(Database::open_with_config(
        path,
        Config::new().backend(backend).mode(mode),
    )?)
}

/// Converts a stored value to JSON.
///
/// Bytes become lowercase hex strings; map keys that are not text are
/// rendered with their display form.
pub fn to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;

    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Integer(i) => Json::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Value::Bytes(bytes) => Json::String(bytes.iter().map(|b| format!("{b:02x}")).collect()),
        Value::Text(text) => Json::String(text.clone()),
        Value::Array(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Map(pairs) => Json::Object(
            pairs
                .iter()
                .map(|(k, v)| {
                    let key = match k {
                        Value::Text(text) => text.clone(),
                        other => other.to_string(),
                    };
                    (key, to_json(v))
                })
                .collect(),
        ),
    }
}

/// Converts JSON to a stored value.
///
/// Whole numbers that fit in `i64` become integers and fractional numbers
/// become floats.
///
/// # Errors
///
/// Returns an error for whole numbers outside the `i64` range, which no
/// stored value can hold exactly.
pub fn from_json(json: &serde_json::Value) -> Result<Value, Box<dyn std::error::Error>> {
    use serde_json::Value as Json;

    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match (n.as_i64(), n.is_f64(), n.as_f64()) {
            (Some(i), _, _) => Value::Integer(i),
            (None, true, Some(x)) => Value::Float(x),
            _ => return Err(format!("number {n} is out of range").into()),
        },
        Json::String(text) => Value::Text(text.clone()),
        Json::Array(items) => Value::Array(items.iter().map(from_json).collect::<Result<_, _>>()?),
        Json::Object(object) => {
            let mut pairs = Vec::with_capacity(object.len());
            for (k, v) in object {
                pairs.push((Value::Text(k.clone()), from_json(v)?));
            }
            Value::map(pairs)
        }
    })
}

/// Total bytes the storage occupies on disk.
pub fn storage_size(path: &Path, backend: BackendKind) -> std::io::Result<u64> {
    let Some(storage) = backend.storage_path(path) else {
        return Ok(0);
    };
    let metadata = std::fs::metadata(&storage)?;
    if !metadata.is_dir() {
        return Ok(metadata.len());
    }
    let mut total = 0;
    for entry in std::fs::read_dir(&storage)? {
        let metadata = entry?.metadata()?;
        if metadata.is_file() {
            total += metadata.len();
        }
    }
    Ok(total)
}

/// Formats a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
