//! Edit protocol for catalog records.
//!
//! An edit prepares the new poster and embedding first, then writes metadata
//! through a ladder of increasingly narrow attempts:
//!
//! 1. full-document replace matched on identity plus the current shard value,
//! 2. partial update under the same match when the replace changed nothing,
//! 3. partial update matched on identity alone when a store call faulted.
//!
//! The ladder is driven by [`next_state`], a pure transition function.
//!
//! Concurrent edits to the same record are not serialized. The modified
//! count is the only lost-update check and the last matching write wins.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use cinematch_core::error::{CinematchError, Result};
use cinematch_core::types::{BlobRef, ItemEdit, ItemId, ID_FIELD};
use cinematch_storage::{
    BlobStore, CatalogRepository, Document, Filter, UpdateOptions, WriteResult,
};

use crate::embedding::DynImageEmbeddingService;

/// Why an edit ended in [`UpdateState::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    StoreUnavailable,
}

/// Position of an edit on the fallback ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    Prepared,
    FullReplaceAttempted,
    PartialUpdateAttempted,
    MinimalUpdateAttempted,
    Done,
    Failed(FailureKind),
}

impl UpdateState {
    pub fn is_terminal(self) -> bool {
        matches!(self, UpdateState::Done | UpdateState::Failed(_))
    }
}

/// Result of the step taken in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Preparation finished; nothing has been written.
    Ready,
    /// The store answered.
    Wrote(WriteResult),
    /// The store call failed.
    StoreError,
}

/// Transition table of the fallback ladder.
pub fn next_state(state: UpdateState, outcome: StepOutcome) -> UpdateState {
    use StepOutcome::*;
    use UpdateState::*;

    match (state, outcome) {
        (Prepared, _) => FullReplaceAttempted,

        (FullReplaceAttempted, Wrote(w)) if w.modified > 0 => Done,
        (FullReplaceAttempted, Wrote(_)) | (FullReplaceAttempted, Ready) => PartialUpdateAttempted,
        (FullReplaceAttempted, StoreError) => MinimalUpdateAttempted,

        (PartialUpdateAttempted, Wrote(w)) if w.matched > 0 => Done,
        (PartialUpdateAttempted, _) => MinimalUpdateAttempted,

        (MinimalUpdateAttempted, Wrote(w)) if w.matched > 0 => Done,
        (MinimalUpdateAttempted, Wrote(_)) | (MinimalUpdateAttempted, Ready) => {
            Failed(FailureKind::NotFound)
        }
        (MinimalUpdateAttempted, StoreError) => Failed(FailureKind::StoreUnavailable),

        (terminal @ (Done | Failed(_)), _) => terminal,
    }
}

/// A replacement poster supplied with an edit.
#[derive(Debug, Clone)]
pub struct PosterUpload {
    pub bytes: Vec<u8>,
    pub filename: String,
}

/// What an applied edit did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditReport {
    pub id: ItemId,
    /// Every state the edit passed through, `Prepared` first.
    pub trail: Vec<UpdateState>,
    /// Blob now referenced by the record, when a poster was supplied.
    pub new_blob: Option<BlobRef>,
    /// Whether an embedding was stored alongside the new poster.
    pub embedding_stored: bool,
    /// Whether the last write reported a content change.
    pub modified: bool,
}

impl EditReport {
    pub fn final_state(&self) -> UpdateState {
        self.trail.last().copied().unwrap_or(UpdateState::Prepared)
    }
}

/// Poster and embedding produced ahead of the metadata write.
struct PreparedPoster {
    blob: BlobRef,
    embedding: Option<Vec<f32>>,
}

/// Applies edits to catalog records.
pub struct UpdateProtocol {
    repo: CatalogRepository,
    embedder: Arc<dyn DynImageEmbeddingService>,
}

impl UpdateProtocol {
    pub fn new(repo: CatalogRepository, embedder: Arc<dyn DynImageEmbeddingService>) -> Self {
        Self { repo, embedder }
    }

    /// Apply `edit` (and optionally a new poster) to record `id`.
    ///
    /// A new poster is stored and embedded before any metadata is written.
    /// Failure to embed leaves the record with a `null` embedding. The old
    /// blob is released once the record points at the new one; if every
    /// write attempt fails the new blob is released instead.
    pub async fn apply(
        &self,
        id: ItemId,
        edit: &ItemEdit,
        poster: Option<PosterUpload>,
    ) -> Result<EditReport> {
        let existing = self.repo.get_document(id)?;
        let shard_key = self.discover_shard_key();

        let prepared = match poster {
            Some(upload) => Some(self.prepare_poster(id, upload).await?),
            None => None,
        };

        let fields = build_fields(edit, prepared.as_ref(), shard_key.as_deref())?;
        let filter = match_filter(id, &existing, shard_key.as_deref());
        let minimal_filter = Filter::by_id(id);
        let mut full_doc = existing.clone();
        for (k, v) in &fields {
            full_doc.insert(k.clone(), v.clone());
        }

        let mut state = UpdateState::Prepared;
        let mut trail = vec![state];
        let mut last_write = WriteResult::UNMATCHED;
        let mut last_error: Option<CinematchError> = None;
        let mut outcome = StepOutcome::Ready;

        loop {
            state = next_state(state, outcome);
            trail.push(state);
            if state.is_terminal() {
                break;
            }

            let attempt = match state {
                UpdateState::FullReplaceAttempted => {
                    self.repo.replace_full(&filter, full_doc.clone())
                }
                UpdateState::PartialUpdateAttempted => self.repo.update_fields(
                    &filter,
                    fields.clone(),
                    UpdateOptions {
                        bypass_document_validation: true,
                    },
                ),
                UpdateState::MinimalUpdateAttempted => {
                    self.repo
                        .update_fields(&minimal_filter, fields.clone(), UpdateOptions::default())
                }
                UpdateState::Prepared | UpdateState::Done | UpdateState::Failed(_) => break,
            };

            outcome = match attempt {
                Ok(write) => {
                    debug!(id = %id, state = ?state, matched = write.matched, modified = write.modified, "Edit attempt answered");
                    last_write = write;
                    StepOutcome::Wrote(write)
                }
                Err(e) => {
                    warn!(id = %id, state = ?state, error = %e, "Edit attempt failed");
                    last_error = Some(e);
                    StepOutcome::StoreError
                }
            };
        }

        match state {
            UpdateState::Done => {
                if let Some(p) = &prepared {
                    self.release_replaced_blob(&existing, p.blob);
                }
                info!(id = %id, trail = ?trail, "Edit applied");
                Ok(EditReport {
                    id,
                    trail,
                    new_blob: prepared.as_ref().map(|p| p.blob),
                    embedding_stored: prepared.as_ref().is_some_and(|p| p.embedding.is_some()),
                    modified: last_write.modified > 0,
                })
            }
            _ => {
                if let Some(p) = &prepared {
                    if let Err(e) = self.repo.blobs().delete(p.blob) {
                        warn!(id = %id, blob = %p.blob, error = %e, "Could not release unused poster");
                    }
                }
                warn!(id = %id, trail = ?trail, "Edit failed after exhausting fallbacks");
                Err(match state {
                    UpdateState::Failed(FailureKind::NotFound) => CinematchError::item_not_found(id),
                    _ => last_error.unwrap_or_else(|| {
                        CinematchError::StoreUnavailable(format!("edit of movie {} failed", id))
                    }),
                })
            }
        }
    }

    fn discover_shard_key(&self) -> Option<String> {
        match self.repo.shard_key() {
            Ok(key) => key.filter(|k| k != ID_FIELD),
            Err(e) => {
                warn!(error = %e, "Shard key unavailable, matching on identity only");
                None
            }
        }
    }

    async fn prepare_poster(&self, id: ItemId, upload: PosterUpload) -> Result<PreparedPoster> {
        let blob = self.repo.blobs().put(&upload.bytes, &upload.filename)?;
        let embedding = match self.embedder.embed_boxed(&upload.bytes).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(id = %id, error = %e, "Poster embedding failed, storing without embedding");
                None
            }
        };
        Ok(PreparedPoster { blob, embedding })
    }

    fn release_replaced_blob(&self, existing: &Document, new_blob: BlobRef) {
        let old = existing
            .get("blob_ref")
            .and_then(Value::as_str)
            .and_then(|s| BlobRef::parse(s).ok());
        if let Some(old) = old.filter(|b| *b != new_blob) {
            if let Err(e) = self.repo.blobs().delete(old) {
                warn!(blob = %old, error = %e, "Could not release replaced poster");
            }
        }
    }
}

/// Fields an edit overwrites. The shard-routing field is never among them.
fn build_fields(
    edit: &ItemEdit,
    poster: Option<&PreparedPoster>,
    shard_key: Option<&str>,
) -> Result<Document> {
    let mut fields = edit.to_fields()?;
    if let Some(p) = poster {
        fields.insert("blob_ref".to_string(), Value::String(p.blob.to_string()));
        fields.insert("embedding".to_string(), serde_json::to_value(&p.embedding)?);
    }
    if let Some(key) = shard_key {
        if fields.remove(key).is_some() {
            warn!(field = key, "Ignoring edit of the shard-routing field");
        }
    }
    Ok(fields)
}

/// Identity plus the record's current shard value, when one is configured.
fn match_filter(id: ItemId, existing: &Document, shard_key: Option<&str>) -> Filter {
    let filter = Filter::by_id(id);
    match shard_key {
        Some(key) => {
            let current = existing.get(key).cloned().unwrap_or(Value::Null);
            filter.eq(key, current)
        }
        None => filter,
    }
}
