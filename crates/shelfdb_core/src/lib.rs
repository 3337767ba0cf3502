//! # ShelfDB Core
//!
//! Embedded, schema-less document store.
//!
//! A [`Database`] holds named [`Table`]s; a table maps string keys to
//! [`Entry`] records, each a mapping from field names to dynamic
//! [`Value`]s. This crate provides:
//! - Tables with get/set/update/delete and atomic read-modify-write
//! - Predicate queries with lazily built, always current field indexes
//! - Narrowable [`QueryResult`]s
//! - Optional writeback caching and explicit sync
//! - Logical backup and verification
//!
//! ## Example
//!
//! ```rust
//! use shelfdb_core::{entry, query, Database};
//!
//! let db = Database::open_in_memory().unwrap();
//! let books = db.table("books").unwrap();
//! books.set("dune", entry! { "year" => 1965, "genre" => "sf" }).unwrap();
//! books.set("emma", entry! { "year" => 1815, "genre" => "novel" }).unwrap();
//! books.set("neuromancer", entry! { "year" => 1984, "genre" => "sf" }).unwrap();
//!
//! let sf = books.query("genre", query::eq("sf"), None).unwrap();
//! let modern_sf = sf.query("year", query::gt(1970), None).unwrap();
//! assert_eq!(modern_sf.keys(), ["neuromancer"]);
//!
//! // Missing keys read as empty entries, so defaults come from the caller.
//! let pages = books.get("dune").unwrap().get_or("pages", 0);
//! assert_eq!(pages.as_integer(), Some(0));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backup;
mod batch;
mod config;
mod database;
mod entry;
mod error;
mod index;
pub mod query;
mod result;
mod store;
mod table;
mod writeback;

pub use backup::{VerifyProblem, VerifyReport};
pub use batch::Batch;
pub use config::Config;
pub use database::Database;
pub use entry::Entry;
pub use error::{CoreError, CoreResult};
pub use index::{FieldIndex, IndexRegistry, IndexStats};
pub use result::QueryResult;
pub use table::Table;
pub use writeback::WritebackCache;

pub use shelfdb_codec::{Value, ValueKind};
pub use shelfdb_storage::{Backend, BackendKind, OpenMode};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
