//! Poster blob storage.
//!
//! The `BlobStore` contract hands out a fresh reference on every `put` and
//! treats `delete` of an absent reference as success. `SqliteBlobStore`
//! keeps the bytes in the `blobs` table of the shared database.

use std::sync::Arc;

use rusqlite::OptionalExtension;
use tracing::debug;

use cinematch_core::error::{CinematchError, Result};
use cinematch_core::types::BlobRef;

use crate::db::{store_err, Database};

/// Storage for opaque binary objects addressed by [`BlobRef`].
pub trait BlobStore: Send + Sync {
    /// Store `data` under a newly minted reference.
    fn put(&self, data: &[u8], filename: &str) -> Result<BlobRef>;

    /// Fetch the bytes behind `blob`, or `NotFound`.
    fn get(&self, blob: BlobRef) -> Result<Vec<u8>>;

    /// Release `blob`. Deleting an absent reference is not an error.
    fn delete(&self, blob: BlobRef) -> Result<()>;

    /// Whether `blob` currently resolves.
    fn exists(&self, blob: BlobRef) -> Result<bool> {
        match self.get(blob) {
            Ok(_) => Ok(true),
            Err(CinematchError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Blob store backed by the `blobs` table.
pub struct SqliteBlobStore {
    db: Arc<Database>,
    max_size: usize,
}

impl SqliteBlobStore {
    pub fn new(db: Arc<Database>, max_size: usize) -> Self {
        Self { db, max_size }
    }

    /// Number of stored blobs.
    pub fn count(&self) -> Result<u64> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM blobs", [], |row| row.get(0))
                .map_err(store_err("Failed to count blobs"))?;
            Ok(count as u64)
        })
    }
}

impl BlobStore for SqliteBlobStore {
    fn put(&self, data: &[u8], filename: &str) -> Result<BlobRef> {
        if data.len() > self.max_size {
            return Err(CinematchError::Validation(format!(
                "blob of {} bytes exceeds the {} byte limit",
                data.len(),
                self.max_size
            )));
        }

        let blob = BlobRef::new();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO blobs (id, filename, length, data) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![blob.to_string(), filename, data.len() as i64, data],
            )
            .map_err(store_err("Failed to store blob"))?;
            Ok(())
        })?;

        debug!(blob = %blob, filename, bytes = data.len(), "Blob stored");
        Ok(blob)
    }

    fn get(&self, blob: BlobRef) -> Result<Vec<u8>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT data FROM blobs WHERE id = ?1",
                rusqlite::params![blob.to_string()],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .map_err(store_err("Failed to read blob"))?
            .ok_or_else(|| CinematchError::NotFound(format!("blob {}", blob)))
        })
    }

    fn delete(&self, blob: BlobRef) -> Result<()> {
        let removed = self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM blobs WHERE id = ?1",
                rusqlite::params![blob.to_string()],
            )
            .map_err(store_err("Failed to delete blob"))
        })?;

        if removed == 0 {
            debug!(blob = %blob, "Blob already absent");
        } else {
            debug!(blob = %blob, "Blob released");
        }
        Ok(())
    }
}
