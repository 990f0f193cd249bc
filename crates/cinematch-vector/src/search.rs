//! Poster similarity search and embedding recommendations.
//!
//! `PosterSearch` embeds a query poster with the configured
//! `DynImageEmbeddingService`, ranks the stored catalog against it and
//! truncates to the caller's limit.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use cinematch_core::config::SearchConfig;
use cinematch_core::error::{CinematchError, Result};
use cinematch_core::types::{ItemId, ItemRecord};
use cinematch_storage::CatalogRepository;

use crate::embedding::DynImageEmbeddingService;
use crate::ranker::rank;

/// A search hit with display fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub id: ItemId,
    pub score: f64,
    pub title: Option<String>,
    pub overview: Option<String>,
}

/// Ranked lookup over the whole catalog.
pub struct PosterSearch {
    repo: CatalogRepository,
    embedder: Arc<dyn DynImageEmbeddingService>,
    default_limit: usize,
    max_limit: usize,
}

impl PosterSearch {
    pub fn new(
        repo: CatalogRepository,
        embedder: Arc<dyn DynImageEmbeddingService>,
        config: &SearchConfig,
    ) -> Self {
        Self {
            repo,
            embedder,
            default_limit: config.default_limit.max(1),
            max_limit: config.max_limit.max(1),
        }
    }

    /// `None` means the default; anything else is clamped to `1..=max_limit`.
    pub fn clamp_limit(&self, limit: Option<usize>) -> usize {
        limit
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit)
    }

    /// Embed `poster` and return the closest catalog items.
    ///
    /// An unreadable poster is an error, never an empty result.
    pub async fn search_by_poster(
        &self,
        poster: &[u8],
        limit: Option<usize>,
    ) -> Result<Vec<SearchMatch>> {
        let query = self.embedder.embed_boxed(poster).await?;
        let matches = self.rank_catalog(&query, self.clamp_limit(limit), None)?;
        debug!(bytes = poster.len(), hits = matches.len(), "Poster search finished");
        Ok(matches)
    }

    /// Rank the catalog against a caller-supplied embedding.
    pub fn recommend(&self, query: &[f32], limit: Option<usize>) -> Result<Vec<SearchMatch>> {
        self.check_query(query)?;
        self.rank_catalog(query, self.clamp_limit(limit), None)
    }

    /// Rank the catalog against a stored item's embedding, leaving the item
    /// itself out of the result.
    pub fn recommend_for(&self, id: ItemId, limit: Option<usize>) -> Result<Vec<SearchMatch>> {
        let source = self.repo.get(id)?;
        let query = source.embedding.ok_or_else(|| {
            CinematchError::Validation(format!("movie {} has no poster embedding", id))
        })?;
        self.rank_catalog(&query, self.clamp_limit(limit), Some(id))
    }

    fn check_query(&self, query: &[f32]) -> Result<()> {
        if query.is_empty() {
            return Err(CinematchError::Validation("embedding must not be empty".to_string()));
        }
        let expected = self.embedder.dimensions();
        if query.len() != expected {
            return Err(CinematchError::Validation(format!(
                "embedding has {} dimensions, expected {}",
                query.len(),
                expected
            )));
        }
        Ok(())
    }

    fn rank_catalog(
        &self,
        query: &[f32],
        limit: usize,
        exclude: Option<ItemId>,
    ) -> Result<Vec<SearchMatch>> {
        let records = self.repo.list()?;
        let ranked = rank(
            query,
            records
                .iter()
                .filter(|r| Some(r.id) != exclude)
                .map(|r| (r.id, r.embedding.as_deref())),
        );

        let by_id: HashMap<ItemId, &ItemRecord> = records.iter().map(|r| (r.id, r)).collect();
        Ok(ranked
            .into_iter()
            .take(limit)
            .map(|hit| {
                let record = by_id.get(&hit.id);
                SearchMatch {
                    id: hit.id,
                    score: hit.score,
                    title: record.and_then(|r| r.metadata.title.clone()),
                    overview: record.and_then(|r| r.metadata.overview.clone()),
                }
            })
            .collect())
    }
}
