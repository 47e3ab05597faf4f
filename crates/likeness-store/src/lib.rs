//! likeness-store: SQLite persistence for enrolled face embeddings.

pub mod sqlite;

use std::path::PathBuf;

pub use sqlite::{SqliteIdentityStore, SqliteStoreError};

/// Environment variable overriding the database location.
pub const DB_PATH_ENV: &str = "LIKENESS_DB_PATH";

/// `$LIKENESS_DB_PATH`, else `$XDG_DATA_HOME/likeness/faces.db`, falling
/// back to `~/.local/share`.
pub fn default_db_path() -> PathBuf {
    if let Some(path) = std::env::var_os(DB_PATH_ENV) {
        return PathBuf::from(path);
    }
    let data_home = std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));
    data_home.join("likeness").join("faces.db")
}
