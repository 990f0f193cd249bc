//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex for thread-safe access.
//! Configures WAL mode and recommended PRAGMAs on initialization.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use cinematch_core::error::CinematchError;

use crate::migrations;

/// Thread-safe SQLite database wrapper.
///
/// Every statement runs while the mutex is held, which makes each single
/// store call atomic. Nothing spans several calls.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// Configures WAL mode and synchronous=NORMAL, then runs all pending
    /// migrations.
    pub fn new(path: &Path) -> Result<Self, CinematchError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(|e| {
            CinematchError::StoreUnavailable(format!("Failed to open database: {}", e))
        })?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -65536;",
        )
        .map_err(|e| CinematchError::StoreUnavailable(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, CinematchError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            CinematchError::StoreUnavailable(format!("Failed to open in-memory db: {}", e))
        })?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;

        Ok(db)
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// The mutex is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, CinematchError>
    where
        F: FnOnce(&Connection) -> Result<T, CinematchError>,
    {
        let conn = self.conn.lock().map_err(|e| {
            CinematchError::StoreUnavailable(format!("Database lock poisoned: {}", e))
        })?;
        f(&conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

/// Map a rusqlite failure onto the store-fault variant.
pub(crate) fn store_err(context: &str) -> impl Fn(rusqlite::Error) -> CinematchError + '_ {
    move |e| CinematchError::StoreUnavailable(format!("{}: {}", context, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_documents(db: &Database) -> i64 {
        db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
                .map_err(store_err("count"))
        })
        .unwrap()
    }

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().unwrap();
        assert_eq!(count_documents(&db), 0);
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cinematch.db");
        let db = Database::new(&path).unwrap();

        assert_eq!(count_documents(&db), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_file_database_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cinematch.db");
        {
            let db = Database::new(&path).unwrap();
            db.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO documents (collection, id, body) VALUES ('movies', 'x', '{}')",
                    [],
                )
                .map_err(store_err("insert"))?;
                Ok(())
            })
            .unwrap();
        }
        let db = Database::new(&path).unwrap();
        assert_eq!(count_documents(&db), 1);
    }

    #[test]
    fn test_store_err_maps_to_store_unavailable() {
        let db = Database::in_memory().unwrap();
        let err = db
            .with_conn(|conn| {
                conn.execute("SELECT * FROM no_such_table", [])
                    .map_err(store_err("bad query"))
            })
            .unwrap_err();
        assert!(err.is_store_fault());
        assert!(err.to_string().contains("bad query"));
    }
}
