//! Inspect command implementation.

use super::{format_size, open, storage_size};
use serde::Serialize;
use shelfdb_core::BackendKind;
use std::path::Path;

/// Database inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Storage base name.
    pub path: String,
    /// Backend description.
    pub backend: String,
    /// Bytes on disk.
    pub size: u64,
    /// Whether entries are stored encoded.
    pub serialized: bool,
    /// Number of entries across all tables.
    pub entry_count: usize,
    /// Per-table statistics.
    pub tables: Vec<TableStats>,
}

/// Statistics for a single table.
#[derive(Debug, Serialize)]
pub struct TableStats {
    /// Table name.
    pub name: String,
    /// Number of entries.
    pub entry_count: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, backend: BackendKind, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let db = open(path, backend, false)?;

    let mut tables = Vec::new();
    for table in &db {
        tables.push(TableStats {
            name: table.name().to_string(),
            entry_count: table.len()?,
        });
    }

    let result = InspectResult {
        path: path.display().to_string(),
        backend: db.describe(),
        size: storage_size(path, backend)?,
        serialized: db.serializes(),
        entry_count: tables.iter().map(|t| t.entry_count).sum(),
        tables,
    };
    db.close()?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => print_text_output(&result),
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("ShelfDB Database Inspection");
    println!("===========================");
    println!();
    println!("Path:    {}", result.path);
    println!("Backend: {}", result.backend);
    println!("Size:    {}", format_size(result.size));
    println!("Encoded: {}", if result.serialized { "yes" } else { "no" });
    println!();
    println!("Tables: {} ({} entries)", result.tables.len(), result.entry_count);
    for table in &result.tables {
        println!("  {:<24} {}", table.name, table.entry_count);
    }
}
