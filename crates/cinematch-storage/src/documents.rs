//! Document-oriented metadata storage.
//!
//! `MetadataStore` is the contract the catalog talks to: equality filters,
//! whole-document replace and partial update that both report how many
//! documents matched and how many actually changed, plus the collection's
//! shard-routing field. `SqliteMetadataStore` implements it over JSON bodies
//! in the `documents` table.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rusqlite::{Connection, OptionalExtension};
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use cinematch_core::error::{CinematchError, Result};
use cinematch_core::types::{ItemId, ID_FIELD};

use crate::db::{store_err, Database};

/// A stored document: a JSON object whose `_id` is the identity.
pub type Document = Map<String, Value>;

// =============================================================================
// Filters and write results
// =============================================================================

/// Conjunction of field equality predicates.
///
/// A field absent from a document compares equal to `null`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    /// A filter that matches every document.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match on identity alone.
    pub fn by_id(id: ItemId) -> Self {
        Self::all().eq(ID_FIELD, Value::String(id.to_string()))
    }

    /// Add an equality clause. A repeated field replaces the earlier clause.
    pub fn eq(mut self, field: impl Into<String>, value: Value) -> Self {
        let field = field.into();
        self.clauses.retain(|(f, _)| *f != field);
        self.clauses.push((field, value));
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses
            .iter()
            .all(|(field, expected)| doc.get(field).unwrap_or(&Value::Null) == expected)
    }

    /// The identity this filter pins, if any.
    pub fn id(&self) -> Option<&str> {
        self.value_of(ID_FIELD).and_then(Value::as_str)
    }

    pub fn value_of(&self, field: &str) -> Option<&Value> {
        self.clauses
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.clauses.iter().map(|(f, _)| f.as_str())
    }
}

/// Outcome of a single-document write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteResult {
    /// Documents the filter selected (0 or 1).
    pub matched: u64,
    /// Documents whose stored content changed (0 or 1).
    pub modified: u64,
}

impl WriteResult {
    pub const UNMATCHED: WriteResult = WriteResult {
        matched: 0,
        modified: 0,
    };
}

/// Options for [`MetadataStore::update_one`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Skip the collection's schema check for this write.
    pub bypass_document_validation: bool,
}

// =============================================================================
// Schema validation
// =============================================================================

/// JSON type a field must have when present and non-null.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Array,
    Object,
    Bool,
}

impl FieldKind {
    fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (FieldKind::String, Value::String(_)) => true,
            (FieldKind::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (FieldKind::Number, Value::Number(_)) => true,
            (FieldKind::Array, Value::Array(_)) => true,
            (FieldKind::Object, Value::Object(_)) => true,
            (FieldKind::Bool, Value::Bool(_)) => true,
            _ => false,
        }
    }
}

/// Per-collection field type rules checked on every write.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DocumentSchema {
    fields: Vec<(String, FieldKind)>,
}

impl DocumentSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push((name.into(), kind));
        self
    }

    pub fn check(&self, doc: &Document) -> std::result::Result<(), String> {
        for (name, kind) in &self.fields {
            if let Some(value) = doc.get(name) {
                if !kind.accepts(value) {
                    return Err(format!("field '{}' must be {:?}, got {}", name, kind, value));
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Contract
// =============================================================================

/// Document store holding catalog metadata.
pub trait MetadataStore: Send + Sync {
    /// All documents matching `filter`, in insertion order.
    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>>;

    /// First document matching `filter`.
    fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>> {
        Ok(self.find(collection, filter)?.into_iter().next())
    }

    /// Insert all documents atomically, assigning `_id` where absent.
    fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<Vec<ItemId>>;

    /// Replace the first matching document wholesale. `_id` may not change.
    fn replace_one(&self, collection: &str, filter: &Filter, doc: Document) -> Result<WriteResult>;

    /// Overwrite the given fields of the first matching document.
    fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        fields: Document,
        options: UpdateOptions,
    ) -> Result<WriteResult>;

    /// Delete the first matching document; returns the number deleted.
    fn delete_one(&self, collection: &str, filter: &Filter) -> Result<u64>;

    fn count(&self, collection: &str) -> Result<u64>;

    /// The shard-routing field configured for `collection`, if any.
    fn shard_key(&self, collection: &str) -> Result<Option<String>>;
}

// =============================================================================
// SQLite implementation
// =============================================================================

/// Metadata store over the `documents` and `collection_config` tables.
pub struct SqliteMetadataStore {
    db: Arc<Database>,
    schemas: RwLock<HashMap<String, DocumentSchema>>,
}

impl SqliteMetadataStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            schemas: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or with `None`, clear) the shard-routing field of a collection.
    pub fn configure_shard_key(&self, collection: &str, shard_key: Option<&str>) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO collection_config (collection, shard_key) VALUES (?1, ?2)
                 ON CONFLICT(collection) DO UPDATE SET shard_key = excluded.shard_key",
                rusqlite::params![collection, shard_key],
            )
            .map_err(store_err("Failed to configure shard key"))?;
            Ok(())
        })?;
        info!(collection, shard_key = ?shard_key, "Collection routing configured");
        Ok(())
    }

    /// Install the field rules enforced on writes to `collection`.
    pub fn set_schema(&self, collection: &str, schema: DocumentSchema) -> Result<()> {
        let mut schemas = self
            .schemas
            .write()
            .map_err(|e| CinematchError::StoreUnavailable(format!("Schema lock poisoned: {}", e)))?;
        schemas.insert(collection.to_string(), schema);
        Ok(())
    }

    fn validate(&self, collection: &str, doc: &Document) -> Result<()> {
        let schemas = self
            .schemas
            .read()
            .map_err(|e| CinematchError::StoreUnavailable(format!("Schema lock poisoned: {}", e)))?;
        if let Some(schema) = schemas.get(collection) {
            schema.check(doc).map_err(|msg| {
                CinematchError::Validation(format!("document validation failed: {}", msg))
            })?;
        }
        Ok(())
    }
}

fn document_id(doc: &Document) -> Result<String> {
    doc.get(ID_FIELD)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CinematchError::Serialization("stored document has no _id".to_string()))
}

/// Load matching documents on `conn`, narrowing by `_id` in SQL when the
/// filter pins it.
fn load(conn: &Connection, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
    let rows: Vec<String> = match filter.id() {
        Some(id) => {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                    rusqlite::params![collection, id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(store_err("Failed to load document"))?;
            body.into_iter().collect()
        }
        None => {
            let mut stmt = conn
                .prepare("SELECT body FROM documents WHERE collection = ?1 ORDER BY rowid")
                .map_err(store_err("Failed to prepare scan"))?;
            let bodies = stmt
                .query_map(rusqlite::params![collection], |row| row.get(0))
                .map_err(store_err("Failed to scan documents"))?;
            let mut out = Vec::new();
            for body in bodies {
                out.push(body.map_err(store_err("Failed to read document row"))?);
            }
            out
        }
    };

    let mut docs = Vec::with_capacity(rows.len());
    for body in rows {
        match serde_json::from_str::<Value>(&body)? {
            Value::Object(doc) if filter.matches(&doc) => docs.push(doc),
            Value::Object(_) => {}
            other => {
                return Err(CinematchError::Serialization(format!(
                    "stored document is not an object: {}",
                    other
                )))
            }
        }
    }
    Ok(docs)
}

/// Overwrite a stored body; returns the number of rows written.
fn write_body(conn: &Connection, collection: &str, id: &str, doc: &Document) -> Result<u64> {
    let body = serde_json::to_string(doc)?;
    let written = conn
        .execute(
            "UPDATE documents SET body = ?3, updated_at = strftime('%s', 'now')
             WHERE collection = ?1 AND id = ?2",
            rusqlite::params![collection, id, body],
        )
        .map_err(store_err("Failed to write document"))?;
    Ok(written as u64)
}

impl MetadataStore for SqliteMetadataStore {
    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        self.db.with_conn(|conn| load(conn, collection, filter))
    }

    fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<Vec<ItemId>> {
        let mut prepared = Vec::with_capacity(docs.len());
        for mut doc in docs {
            let id = match doc.get(ID_FIELD) {
                Some(Value::String(s)) => Uuid::parse_str(s).map_err(|e| {
                    CinematchError::Validation(format!("invalid _id '{}': {}", s, e))
                })?,
                Some(Value::Null) | None => Uuid::new_v4(),
                Some(other) => {
                    return Err(CinematchError::Validation(format!(
                        "_id must be a string, got {}",
                        other
                    )))
                }
            };
            doc.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
            self.validate(collection, &doc)?;
            prepared.push((id, serde_json::to_string(&doc)?));
        }

        self.db.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(store_err("Failed to begin insert"))?;
            for (id, body) in &prepared {
                tx.execute(
                    "INSERT INTO documents (collection, id, body) VALUES (?1, ?2, ?3)",
                    rusqlite::params![collection, id.to_string(), body],
                )
                .map_err(store_err("Failed to insert document"))?;
            }
            tx.commit().map_err(store_err("Failed to commit insert"))?;
            Ok(())
        })?;

        debug!(collection, count = prepared.len(), "Documents inserted");
        Ok(prepared.into_iter().map(|(id, _)| id).collect())
    }

    fn replace_one(&self, collection: &str, filter: &Filter, mut doc: Document) -> Result<WriteResult> {
        self.db.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(store_err("Failed to begin replace"))?;
            let Some(existing) = load(&tx, collection, filter)?.into_iter().next() else {
                return Ok(WriteResult::UNMATCHED);
            };
            let id = document_id(&existing)?;

            match doc.get(ID_FIELD) {
                None => {
                    doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                }
                Some(Value::String(s)) if *s == id => {}
                Some(other) => {
                    return Err(CinematchError::Validation(format!(
                        "_id is immutable: cannot change {} to {}",
                        id, other
                    )))
                }
            }
            self.validate(collection, &doc)?;

            if doc == existing {
                return Ok(WriteResult {
                    matched: 1,
                    modified: 0,
                });
            }
            let modified = write_body(&tx, collection, &id, &doc)?;
            tx.commit().map_err(store_err("Failed to commit replace"))?;
            Ok(WriteResult {
                matched: 1,
                modified,
            })
        })
    }

    fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        fields: Document,
        options: UpdateOptions,
    ) -> Result<WriteResult> {
        self.db.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(store_err("Failed to begin update"))?;
            let Some(existing) = load(&tx, collection, filter)?.into_iter().next() else {
                return Ok(WriteResult::UNMATCHED);
            };
            let id = document_id(&existing)?;

            if let Some(new_id) = fields.get(ID_FIELD) {
                if new_id.as_str() != Some(id.as_str()) {
                    return Err(CinematchError::Validation(format!(
                        "_id is immutable: cannot change {} to {}",
                        id, new_id
                    )));
                }
            }

            let mut merged = existing.clone();
            for (field, value) in fields {
                merged.insert(field, value);
            }
            if !options.bypass_document_validation {
                self.validate(collection, &merged)?;
            }

            if merged == existing {
                return Ok(WriteResult {
                    matched: 1,
                    modified: 0,
                });
            }
            let modified = write_body(&tx, collection, &id, &merged)?;
            tx.commit().map_err(store_err("Failed to commit update"))?;
            Ok(WriteResult {
                matched: 1,
                modified,
            })
        })
    }

    fn delete_one(&self, collection: &str, filter: &Filter) -> Result<u64> {
        self.db.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(store_err("Failed to begin delete"))?;
            let Some(existing) = load(&tx, collection, filter)?.into_iter().next() else {
                return Ok(0);
            };
            let id = document_id(&existing)?;
            let deleted = tx
                .execute(
                    "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                    rusqlite::params![collection, id],
                )
                .map_err(store_err("Failed to delete document"))?;
            tx.commit().map_err(store_err("Failed to commit delete"))?;
            Ok(deleted as u64)
        })
    }

    fn count(&self, collection: &str) -> Result<u64> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM documents WHERE collection = ?1",
                    rusqlite::params![collection],
                    |row| row.get(0),
                )
                .map_err(store_err("Failed to count documents"))?;
            Ok(count as u64)
        })
    }

    fn shard_key(&self, collection: &str) -> Result<Option<String>> {
        self.db.with_conn(|conn| {
            let key: Option<Option<String>> = conn
                .query_row(
                    "SELECT shard_key FROM collection_config WHERE collection = ?1",
                    rusqlite::params![collection],
                    |row| row.get(0),
                )
                .optional()
                .map_err(store_err("Failed to read collection config"))?;
            Ok(key.flatten())
        })
    }
}
