//! Catalog repository over the metadata and blob stores.
//!
//! `CatalogRepository` speaks in `ItemRecord`s and owns the pairing between a
//! record and its poster blob. The write primitives used by edits
//! (`replace_full`, `update_fields`) are exposed raw so the caller sees
//! matched and modified counts.

use std::sync::Arc;

use tracing::{debug, info};

use cinematch_core::error::{CinematchError, Result};
use cinematch_core::types::{ItemDraft, ItemId, ItemRecord};

use crate::blob::BlobStore;
use crate::documents::{
    Document, DocumentSchema, FieldKind, Filter, MetadataStore, UpdateOptions, WriteResult,
};

/// Field rules for movie documents.
pub fn movie_schema() -> DocumentSchema {
    DocumentSchema::new()
        .field("title", FieldKind::String)
        .field("overview", FieldKind::String)
        .field("release_date", FieldKind::String)
        .field("release_year", FieldKind::Integer)
        .field("genres", FieldKind::Array)
        .field("cast", FieldKind::Array)
        .field("blob_ref", FieldKind::String)
        .field("embedding", FieldKind::Array)
}

/// Repository for cataloged movies.
#[derive(Clone)]
pub struct CatalogRepository {
    documents: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    collection: String,
}

impl CatalogRepository {
    pub fn new(
        documents: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            documents,
            blobs,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// Every record, in insertion order.
    pub fn list(&self) -> Result<Vec<ItemRecord>> {
        self.documents
            .find(&self.collection, &Filter::all())?
            .into_iter()
            .map(ItemRecord::from_document)
            .collect()
    }

    pub fn get(&self, id: ItemId) -> Result<ItemRecord> {
        match self.documents.find_one(&self.collection, &Filter::by_id(id))? {
            Some(doc) => ItemRecord::from_document(doc),
            None => Err(CinematchError::item_not_found(id)),
        }
    }

    /// The raw stored document of a record.
    pub fn get_document(&self, id: ItemId) -> Result<Document> {
        self.documents
            .find_one(&self.collection, &Filter::by_id(id))?
            .ok_or_else(|| CinematchError::item_not_found(id))
    }

    pub fn insert(&self, draft: &ItemDraft) -> Result<ItemId> {
        let ids = self.insert_many(std::slice::from_ref(draft))?;
        ids.into_iter().next().ok_or_else(|| {
            CinematchError::StoreUnavailable("insert returned no identifier".to_string())
        })
    }

    /// Insert a batch in one store call. Either every draft lands or none does.
    pub fn insert_many(&self, drafts: &[ItemDraft]) -> Result<Vec<ItemId>> {
        let docs = drafts
            .iter()
            .map(ItemDraft::to_document)
            .collect::<Result<Vec<_>>>()?;
        let ids = self.documents.insert_many(&self.collection, docs)?;
        debug!(count = ids.len(), "Catalog records inserted");
        Ok(ids)
    }

    /// Delete a record, releasing its poster blob first.
    pub fn delete(&self, id: ItemId) -> Result<()> {
        let record = self.get(id)?;
        if let Some(blob) = record.blob_ref {
            self.blobs.delete(blob)?;
        }

        let deleted = self
            .documents
            .delete_one(&self.collection, &Filter::by_id(id))?;
        if deleted == 0 {
            return Err(CinematchError::item_not_found(id));
        }
        info!(id = %id, had_poster = record.blob_ref.is_some(), "Catalog record deleted");
        Ok(())
    }

    /// Poster bytes of a record, `NotFound` when it has none.
    pub fn poster(&self, id: ItemId) -> Result<Vec<u8>> {
        let record = self.get(id)?;
        let blob = record
            .blob_ref
            .ok_or_else(|| CinematchError::NotFound(format!("poster for movie {}", id)))?;
        self.blobs.get(blob)
    }

    pub fn count(&self) -> Result<u64> {
        self.documents.count(&self.collection)
    }

    /// The collection's shard-routing field, as the store reports it.
    pub fn shard_key(&self) -> Result<Option<String>> {
        self.documents.shard_key(&self.collection)
    }

    /// Whole-document replace under `filter`.
    pub fn replace_full(&self, filter: &Filter, doc: Document) -> Result<WriteResult> {
        self.documents.replace_one(&self.collection, filter, doc)
    }

    /// Partial overwrite of `fields` under `filter`.
    pub fn update_fields(
        &self,
        filter: &Filter,
        fields: Document,
        options: UpdateOptions,
    ) -> Result<WriteResult> {
        self.documents
            .update_one(&self.collection, filter, fields, options)
    }
}
