//! Database configuration.

use shelfdb_storage::{BackendKind, OpenMode};

/// Configuration for opening a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// How existing storage is treated on open.
    pub mode: OpenMode,

    /// Whether writes are cached in memory until `sync` or `close`.
    pub writeback: bool,

    /// Which backend variant holds the data.
    pub backend: BackendKind,

    /// Whether entries are stored as encoded bytes. `None` follows the
    /// backend's own hint.
    pub serialize: Option<bool>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: OpenMode::CreateIfMissing,
            writeback: false,
            backend: BackendKind::File,
            serialize: None,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the open mode.
    #[must_use]
    pub const fn mode(mut self, mode: OpenMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets whether writes are cached until sync.
    #[must_use]
    pub const fn writeback(mut self, value: bool) -> Self {
        self.writeback = value;
        self
    }

    /// Sets the backend variant.
    #[must_use]
    pub const fn backend(mut self, kind: BackendKind) -> Self {
        self.backend = kind;
        self
    }

    /// Forces entries to be stored encoded (`true`) or native (`false`).
    #[must_use]
    pub const fn serialize(mut self, value: bool) -> Self {
        self.serialize = Some(value);
        self
    }

    /// Shorthand for [`OpenMode::ReadOnly`].
    #[must_use]
    pub const fn read_only(self) -> Self {
        self.mode(OpenMode::ReadOnly)
    }
}
