//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] behind a mutex so
//! the HTTP handlers, the worker pool and the console reporter can share one
//! handle, and guarantees that migrations are run before any other
//! operation.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::Connection;

use crate::error::Result;
use crate::migrations;

const DB_FILE: &str = "agent.db";

/// Shared handle to the agent database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open (or create) the agent database under `data_folder`.
    ///
    /// With no data folder the database lives in memory and nothing
    /// survives a restart; a warning is logged in that case.
    pub fn open(data_folder: Option<&Path>) -> Result<Self> {
        match data_folder {
            Some(folder) => {
                std::fs::create_dir_all(folder)?;
                let path = folder.join(DB_FILE);
                tracing::info!(path = %path.display(), "opening database");

                let conn = Connection::open(&path)?;
                conn.pragma_update(None, "journal_mode", "WAL")?;
                conn.pragma_update(None, "foreign_keys", "ON")?;
                Self::init(conn, Some(path))
            }
            None => {
                tracing::warn!("data folder not set, using in-memory database (data will not persist)");
                Self::init(Connection::open_in_memory()?, None)
            }
        }
    }

    fn init(mut conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        migrations::run(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Lock the underlying connection.
    ///
    /// Callers should prefer the typed helpers; the guard is handed out for
    /// single statements and never held across suspension points.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Filesystem path of the open database, `None` when in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(Some(dir.path())).expect("should open");
        assert!(db.path().is_some());
        assert!(dir.path().join(DB_FILE).exists());
    }

    #[test]
    fn open_in_memory() {
        let db = Database::open(None).expect("should open");
        assert!(db.path().is_none());
    }
}
