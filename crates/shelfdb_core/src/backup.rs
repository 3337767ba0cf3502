//! Logical backup and integrity checks.
//!
//! A backup reads every record of the source through the same decoding
//! and mapping validation as a normal read, and writes it into a fresh
//! database. A record that no longer decodes aborts the copy, so a backup
//! that succeeds is also a proof that every record was readable.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use shelfdb_core::Database;
//!
//! let db = Database::open("live")?;
//! let copy = db.backup("live-backup")?;
//! assert_eq!(copy.raw_keys()?, db.raw_keys()?);
//!
//! let report = db.verify()?;
//! assert!(report.is_ok());
//! # Ok::<(), shelfdb_core::CoreError>(())
//! ```

use crate::config::Config;
use crate::database::Database;
use crate::error::CoreResult;
use shelfdb_storage::{split_key, Backend, BackendKind, OpenMode};
use std::collections::BTreeMap;
use std::path::Path;

impl Database {
    /// Copies every record into a new file database at `name`.
    ///
    /// Existing storage at `name` is discarded. The destination is opened
    /// with writeback on and synced once at the end.
    ///
    /// # Errors
    ///
    /// Returns the first read, validation or write error. A partially
    /// written destination is left in place.
    pub fn backup(&self, name: impl AsRef<Path>) -> CoreResult<Database> {
        self.backup_to(
            name,
            Config::new()
                .backend(BackendKind::File)
                .mode(OpenMode::ForceNew)
                .writeback(true),
        )
    }

    /// Like [`Database::backup`], with full control over the destination
    /// configuration.
    ///
    /// # Errors
    ///
    /// See [`Database::backup`].
    pub fn backup_to(&self, name: impl AsRef<Path>, config: Config) -> CoreResult<Database> {
        let dest = Database::open_with_config(name, config)?;
        self.copy_into(dest)
    }

    /// Copies every record into a new database wrapping `backend`.
    ///
    /// # Errors
    ///
    /// See [`Database::backup`].
    pub fn backup_into(&self, backend: Box<dyn Backend>) -> CoreResult<Database> {
        let dest = Database::open_with_backend(Config::new().writeback(true), backend)?;
        self.copy_into(dest)
    }

    fn copy_into(&self, dest: Database) -> CoreResult<Database> {
        let _guard = self.write_guard();
        self.ensure_open()?;
        let mut copied = 0usize;
        {
            let store = self.store().read();
            for composite in store.keys_with_prefix("")? {
                let (table, key) = split_key(&composite)?;
                let Some(entry) = store.load(&composite)? else {
                    continue;
                };
                dest.write_entry(table, key, entry, false)?;
                copied += 1;
            }
        }
        dest.sync()?;
        tracing::info!(
            copied,
            source = %self.describe(),
            destination = %dest.describe(),
            "backup complete"
        );
        Ok(dest)
    }

    /// Reads and validates every record without copying it.
    ///
    /// Unlike [`Database::backup`], problems are collected instead of
    /// stopping the scan.
    ///
    /// # Errors
    ///
    /// Returns an error only if the database is closed or its keys cannot
    /// be listed.
    pub fn verify(&self) -> CoreResult<VerifyReport> {
        self.ensure_open()?;
        let store = self.store().read();
        let mut report = VerifyReport::default();
        for composite in store.keys_with_prefix("")? {
            let table = match split_key(&composite) {
                Ok((table, _)) => table.to_string(),
                Err(e) => {
                    report.problems.push(VerifyProblem::new(&composite, e));
                    continue;
                }
            };
            match store.load(&composite) {
                Ok(Some(_)) => {
                    report.entries += 1;
                    *report.tables.entry(table).or_insert(0) += 1;
                }
                Ok(None) => {}
                Err(e) => report.problems.push(VerifyProblem::new(&composite, e)),
            }
        }
        tracing::debug!(
            entries = report.entries,
            problems = report.problems.len(),
            "verified database"
        );
        Ok(report)
    }
}

/// Outcome of [`Database::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Readable entries.
    pub entries: usize,
    /// Readable entries per table.
    pub tables: BTreeMap<String, usize>,
    /// Records that failed to read or validate.
    pub problems: Vec<VerifyProblem>,
}

impl VerifyReport {
    /// Whether every record was readable.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

/// One unreadable record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyProblem {
    /// Composite key of the record.
    pub key: String,
    /// What went wrong.
    pub message: String,
}

impl VerifyProblem {
    fn new(key: &str, error: impl std::fmt::Display) -> Self {
        Self {
            key: key.to_string(),
            message: error.to_string(),
        }
    }
}
