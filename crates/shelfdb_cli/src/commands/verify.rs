//! Verify command implementation.

use super::open;
use shelfdb_core::BackendKind;
use std::path::Path;

/// Runs the verify command.
pub fn run(path: &Path, backend: BackendKind) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying database at {:?}", path);
    println!();

    let db = open(path, backend, false)?;
    let report = db.verify()?;
    db.close()?;

    for (table, count) in &report.tables {
        println!("  {:<24} {} entries", table, count);
    }
    println!();
    println!("Entries checked: {}", report.entries + report.problems.len());
    println!("  Valid:   {}", report.entries);
    println!("  Invalid: {}", report.problems.len());

    if !report.problems.is_empty() {
        println!();
        println!("Problems:");
        for problem in report.problems.iter().take(20) {
            println!("  - {}: {}", problem.key, problem.message);
        }
        if report.problems.len() > 20 {
            println!("  ... and {} more", report.problems.len() - 20);
        }
    }

    println!();
    if report.is_ok() {
        println!("✓ Database verification passed");
        Ok(())
    } else {
        println!("✗ Database verification failed");
        Err("Verification failed".into())
    }
}
