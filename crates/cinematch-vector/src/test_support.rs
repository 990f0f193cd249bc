//! Shared fixtures for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use cinematch_core::error::{CinematchError, EmbedError, Result};
use cinematch_core::types::ItemId;
use cinematch_storage::{
    movie_schema, BlobStore, CatalogRepository, Database, Document, Filter, MetadataStore,
    SqliteBlobStore, SqliteMetadataStore, UpdateOptions, WriteResult,
};

use crate::embedding::{ImageEmbeddingService, MockImageEmbedding};
use crate::preprocess::Preprocessor;

pub const COLLECTION: &str = "movies";

/// Small, fast pooled embedder.
pub fn mock_embedder() -> MockImageEmbedding {
    MockImageEmbedding::with_preprocessor(64, Preprocessor::new(32, 32))
}

/// Embedder whose every call fails at the inference stage.
pub struct FailingEmbedder;

impl ImageEmbeddingService for FailingEmbedder {
    async fn embed(&self, _image: &[u8]) -> std::result::Result<Vec<f32>, EmbedError> {
        Err(EmbedError::Inference("model offline".to_string()))
    }

    fn dimensions(&self) -> usize {
        64
    }
}

/// In-memory catalog with handles to each store.
pub struct Catalog {
    pub repo: CatalogRepository,
    pub documents: Arc<SqliteMetadataStore>,
    pub blobs: Arc<SqliteBlobStore>,
}

impl Catalog {
    pub fn in_memory() -> Self {
        let db = Arc::new(Database::in_memory().unwrap());
        let documents = Arc::new(SqliteMetadataStore::new(db.clone()));
        documents.set_schema(COLLECTION, movie_schema()).unwrap();
        documents
            .configure_shard_key(COLLECTION, Some("release_year"))
            .unwrap();
        let blobs = Arc::new(SqliteBlobStore::new(db, 1 << 20));
        let repo = CatalogRepository::new(documents.clone(), blobs.clone(), COLLECTION);
        Self {
            repo,
            documents,
            blobs,
        }
    }
}

/// How a scripted write should behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Forward to the real store.
    Pass,
    /// Report a match without writing anything.
    Untouched,
    /// Report no match.
    Unmatched,
    /// Fail as if the store were unreachable.
    Fail,
}

/// One write the scripted store received.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteCall {
    pub op: &'static str,
    pub filter: Filter,
    pub bypass_validation: bool,
}

/// Metadata store that plays back scripted write outcomes, then passes
/// through once a script runs dry.
pub struct ScriptedStore {
    inner: SqliteMetadataStore,
    insert: Mutex<VecDeque<Script>>,
    replace: Mutex<VecDeque<Script>>,
    update: Mutex<VecDeque<Script>>,
    shard_key_fails: bool,
    calls: Mutex<Vec<WriteCall>>,
}

impl ScriptedStore {
    pub fn new(inner: SqliteMetadataStore) -> Self {
        Self {
            inner,
            insert: Mutex::new(VecDeque::new()),
            replace: Mutex::new(VecDeque::new()),
            update: Mutex::new(VecDeque::new()),
            shard_key_fails: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Only `Fail` changes insert behaviour; anything else passes through.
    pub fn on_insert(self, scripts: &[Script]) -> Self {
        self.insert.lock().unwrap().extend(scripts.iter().copied());
        self
    }

    pub fn on_replace(self, scripts: &[Script]) -> Self {
        self.replace.lock().unwrap().extend(scripts.iter().copied());
        self
    }

    pub fn on_update(self, scripts: &[Script]) -> Self {
        self.update.lock().unwrap().extend(scripts.iter().copied());
        self
    }

    pub fn without_shard_config(mut self) -> Self {
        self.shard_key_fails = true;
        self
    }

    pub fn calls(&self) -> Vec<WriteCall> {
        self.calls.lock().unwrap().clone()
    }

    fn next(queue: &Mutex<VecDeque<Script>>) -> Script {
        queue.lock().unwrap().pop_front().unwrap_or(Script::Pass)
    }

    fn record(&self, op: &'static str, filter: &Filter, bypass_validation: bool) {
        self.calls.lock().unwrap().push(WriteCall {
            op,
            filter: filter.clone(),
            bypass_validation,
        });
    }
}

fn scripted(script: Script) -> Option<Result<WriteResult>> {
    match script {
        Script::Pass => None,
        Script::Untouched => Some(Ok(WriteResult {
            matched: 1,
            modified: 0,
        })),
        Script::Unmatched => Some(Ok(WriteResult::UNMATCHED)),
        Script::Fail => Some(Err(CinematchError::StoreUnavailable(
            "scripted outage".to_string(),
        ))),
    }
}

impl MetadataStore for ScriptedStore {
    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        self.inner.find(collection, filter)
    }

    fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<Vec<ItemId>> {
        if Self::next(&self.insert) == Script::Fail {
            return Err(CinematchError::StoreUnavailable(
                "scripted outage".to_string(),
            ));
        }
        self.inner.insert_many(collection, docs)
    }

    fn replace_one(&self, collection: &str, filter: &Filter, doc: Document) -> Result<WriteResult> {
        self.record("replace_one", filter, false);
        match scripted(Self::next(&self.replace)) {
            Some(result) => result,
            None => self.inner.replace_one(collection, filter, doc),
        }
    }

    fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        fields: Document,
        options: UpdateOptions,
    ) -> Result<WriteResult> {
        self.record("update_one", filter, options.bypass_document_validation);
        match scripted(Self::next(&self.update)) {
            Some(result) => result,
            None => self.inner.update_one(collection, filter, fields, options),
        }
    }

    fn delete_one(&self, collection: &str, filter: &Filter) -> Result<u64> {
        self.inner.delete_one(collection, filter)
    }

    fn count(&self, collection: &str) -> Result<u64> {
        self.inner.count(collection)
    }

    fn shard_key(&self, collection: &str) -> Result<Option<String>> {
        if self.shard_key_fails {
            return Err(CinematchError::StoreUnavailable(
                "config collection unreachable".to_string(),
            ));
        }
        self.inner.shard_key(collection)
    }
}

/// Catalog whose metadata goes through a [`ScriptedStore`].
pub struct ScriptedCatalog {
    pub repo: CatalogRepository,
    pub store: Arc<ScriptedStore>,
    pub blobs: Arc<SqliteBlobStore>,
}

impl ScriptedCatalog {
    pub fn new(configure: impl FnOnce(ScriptedStore) -> ScriptedStore) -> Self {
        let db = Arc::new(Database::in_memory().unwrap());
        let inner = SqliteMetadataStore::new(db.clone());
        inner.set_schema(COLLECTION, movie_schema()).unwrap();
        inner
            .configure_shard_key(COLLECTION, Some("release_year"))
            .unwrap();
        let store = Arc::new(configure(ScriptedStore::new(inner)));
        let blobs = Arc::new(SqliteBlobStore::new(db, 1 << 20));
        let repo = CatalogRepository::new(store.clone(), blobs.clone(), COLLECTION);
        Self { repo, store, blobs }
    }

    pub fn blob_exists(&self, blob: cinematch_core::types::BlobRef) -> bool {
        self.blobs.exists(blob).unwrap()
    }
}
