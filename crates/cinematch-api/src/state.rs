//! Application state shared across all route handlers.
//!
//! AppState holds references to the catalog and the services built on it.
//! It is passed to handlers via axum's State extractor.

use std::sync::Arc;
use std::time::Instant;

use cinematch_core::config::CinematchConfig;
use cinematch_storage::CatalogRepository;
use cinematch_vector::{
    DynImageEmbeddingService, IngestionPipeline, PosterFetcher, PosterSearch, UpdateProtocol,
};

/// Shared application state.
///
/// All fields use `Arc` (or are cheap clones) for sharing across handler
/// tasks.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<CinematchConfig>,
    /// Catalog records and poster blobs.
    pub repo: CatalogRepository,
    /// Poster search and recommendations.
    pub search: Arc<PosterSearch>,
    /// Edit protocol with the write fallback ladder.
    pub updates: Arc<UpdateProtocol>,
    /// Batch ingestion of scraped records.
    pub pipeline: Arc<IngestionPipeline>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Wire the services around one repository and one embedder.
    pub fn new(
        config: CinematchConfig,
        repo: CatalogRepository,
        embedder: Arc<dyn DynImageEmbeddingService>,
        fetcher: Arc<dyn PosterFetcher>,
    ) -> Self {
        let search = PosterSearch::new(repo.clone(), Arc::clone(&embedder), &config.search);
        let updates = UpdateProtocol::new(repo.clone(), Arc::clone(&embedder));
        let pipeline =
            IngestionPipeline::new(repo.clone(), embedder, fetcher, config.ingest.batch_size);
        Self {
            config: Arc::new(config),
            repo,
            search: Arc::new(search),
            updates: Arc::new(updates),
            pipeline: Arc::new(pipeline),
            start_time: Instant::now(),
        }
    }
}
