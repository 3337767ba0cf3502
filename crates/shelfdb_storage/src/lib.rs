//! # ShelfDB Storage
//!
//! The [`Backend`] trait and the storage variants behind a ShelfDB database.
//!
//! Backends are flat key-value stores over composite `table.key`
//! identifiers. They do not interpret the values they hold; entries,
//! tables and indexes live in `shelfdb_core`.
//!
//! ## Available Backends
//!
//! | Kind                        | On disk                  | Notes                              |
//! |-----------------------------|--------------------------|------------------------------------|
//! | [`FileBackend`] (default)   | `<name>.sdb`             | Append-only log, compacted on close |
//! | [`SplitBackend`]            | `<name>.sdd/<table>.sdb` | One log per table                  |
//! | [`WholeFileBackend`]        | `<name>.sdw`             | Whole map in memory, dumped on sync |
//! | [`InMemoryBackend`]         | nothing                  | Volatile                           |
//!
//! ## Example
//!
//! ```rust
//! use shelfdb_storage::{join_key, Backend, InMemoryBackend};
//! use shelfdb_codec::Value;
//!
//! let mut backend = InMemoryBackend::new();
//! backend.set(&join_key("users", "1"), Value::from("Ada")).unwrap();
//! assert_eq!(backend.keys().unwrap(), vec!["users.1".to_string()]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod record;
mod split;
mod whole_file;

pub use backend::{
    join_key, open_backend, split_key, Backend, BackendKind, OpenMode, KEY_SEPARATOR,
};
pub use error::{StorageError, StorageResult};
pub use file::{FileBackend, LOG_SUFFIX};
pub use memory::InMemoryBackend;
pub use split::{SplitBackend, DIR_SUFFIX};
pub use whole_file::{WholeFileBackend, DUMP_SUFFIX};
