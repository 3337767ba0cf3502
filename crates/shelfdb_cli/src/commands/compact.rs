//! Compact command implementation.

use super::{format_size, open, storage_size};
use shelfdb_core::BackendKind;
use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path, backend: BackendKind) -> Result<(), Box<dyn std::error::Error>> {
    println!("Compacting database at {:?}", path);
    println!();

    let before = storage_size(path, backend)?;
    let db = open(path, backend, true)?;
    db.compact()?;
    db.close()?;
    let after = storage_size(path, backend)?;

    let saved = before.saturating_sub(after);
    println!("  Size before: {}", format_size(before));
    println!("  Size after:  {}", format_size(after));
    println!(
        "  Space saved: {} ({:.1}%)",
        format_size(saved),
        if before > 0 {
            (saved as f64 / before as f64) * 100.0
        } else {
            0.0
        }
    );

    Ok(())
}
