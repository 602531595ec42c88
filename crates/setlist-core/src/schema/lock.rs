//! Cross-process exclusive claim on a catalog database.

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

/// An exclusive lock held on `<db>.bootstrap.lock` for as long as the value
/// lives.
///
/// The lock is an open `BEGIN EXCLUSIVE` transaction on a side database, so
/// SQLite's file locking makes it visible to every process and releases it
/// when the holder exits, even abnormally.
#[derive(Debug)]
pub struct RunLock {
    _conn: Connection,
}

impl RunLock {
    /// Takes the lock for `db_path` without waiting.
    ///
    /// # Errors
    /// Fails with a busy error (see [`crate::Error::is_busy`]) when another
    /// connection, in this or any other process, holds it.
    pub fn try_acquire(db_path: &Path) -> Result<Self> {
        let path = lock_path(db_path);
        let conn = Connection::open(&path)?;
        conn.busy_timeout(Duration::ZERO)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS run_lock (id INTEGER PRIMARY KEY);
             BEGIN EXCLUSIVE;",
        )?;
        log::debug!("Acquired run lock {}", path.display());
        Ok(Self { _conn: conn })
    }
}

fn lock_path(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_os_string();
    name.push(".bootstrap.lock");
    PathBuf::from(name)
}
