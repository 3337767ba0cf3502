//! Backup command implementation.
//!
//! Copies through the `Database` API rather than the storage files, so every
//! record is decoded and validated on the way.

use super::{format_size, open, storage_size};
use shelfdb_core::{BackendKind, Config, OpenMode};
use std::path::Path;
use tracing::info;

/// Copies the database at `path` into a fresh `dest` of kind `to`.
///
/// An existing database at `dest` is replaced.
pub fn run(
    path: &Path,
    backend: BackendKind,
    dest: &Path,
    to: BackendKind,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Creating backup of {:?}", path);

    if to == BackendKind::InMemory {
        return Err("backup destination must be stored on disk".into());
    }

    let db = open(path, backend, false)?;
    let config = Config::new()
        .backend(to)
        .mode(OpenMode::ForceNew)
        .writeback(true);
    let copy = db.backup_to(dest, config)?;
    let tables = copy.table_names().len();
    let entries = copy.raw_keys()?.len();
    copy.close()?;
    db.close()?;

    println!("✓ Backup created successfully");
    println!("  Path:    {:?}", dest);
    println!("  Backend: {}", to);
    println!("  Tables:  {}", tables);
    println!("  Entries: {}", entries);
    println!("  Size:    {}", format_size(storage_size(dest, to)?));

    Ok(())
}
