//! Database schema migrations.
//!
//! Creates the document, blob and collection-configuration tables together
//! with the schema_migrations bookkeeping table.

use rusqlite::Connection;
use tracing::info;

use cinematch_core::error::CinematchError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), CinematchError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| {
        CinematchError::StoreUnavailable(format!("Failed to create migrations table: {}", e))
    })?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| {
            CinematchError::StoreUnavailable(format!("Failed to query migration version: {}", e))
        })?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: documents, blobs, collection_config.
fn apply_v1(conn: &Connection) -> Result<(), CinematchError> {
    conn.execute_batch(
        "
        -- JSON documents grouped by collection.
        CREATE TABLE IF NOT EXISTS documents (
            collection  TEXT NOT NULL,
            id          TEXT NOT NULL,
            body        TEXT NOT NULL,
            created_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            updated_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            PRIMARY KEY (collection, id)
        );

        -- Poster images, one row per blob reference.
        CREATE TABLE IF NOT EXISTS blobs (
            id           TEXT PRIMARY KEY NOT NULL,
            filename     TEXT NOT NULL,
            length       INTEGER NOT NULL,
            data         BLOB NOT NULL,
            uploaded_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        -- Per-collection routing configuration.
        CREATE TABLE IF NOT EXISTS collection_config (
            collection  TEXT PRIMARY KEY NOT NULL,
            shard_key   TEXT
        );

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| CinematchError::StoreUnavailable(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_migrations_run_once() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_documents_primary_key_is_per_collection() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO documents (collection, id, body) VALUES ('movies', 'a', '{}')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO documents (collection, id, body) VALUES ('series', 'a', '{}')",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO documents (collection, id, body) VALUES ('movies', 'a', '{}')",
            [],
        );
        assert!(dup.is_err());
    }

    #[test]
    fn test_blobs_table_stores_bytes() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO blobs (id, filename, length, data) VALUES ('b1', 'poster.png', 3, ?1)",
            rusqlite::params![vec![1u8, 2, 3]],
        )
        .unwrap();
        let data: Vec<u8> = conn
            .query_row("SELECT data FROM blobs WHERE id = 'b1'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(data, vec![1, 2, 3]);
    }
}
