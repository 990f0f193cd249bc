//! CineMatch ingestion pipeline.
//!
//! The IngestionPipeline turns scraped movies into catalog records: download
//! the poster, store it, embed it, derive the release year, then insert in
//! batches. Poster problems never abort a batch; the record is stored
//! without a poster instead.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cinematch_core::config::IngestConfig;
use cinematch_core::error::{CinematchError, Result};
use cinematch_core::types::{ItemDraft, ItemId, RawItemRecord};
use cinematch_storage::CatalogRepository;

use crate::embedding::DynImageEmbeddingService;

/// Date layouts accepted for `release_date`.
const RELEASE_DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];

/// Best-effort year extraction from a scraped release date.
///
/// Accepts `YYYY-MM-DD` and `MM/DD/YYYY`, ignoring anything after the first
/// whitespace (scraped dates often carry a region suffix such as `(US)`).
pub fn derive_release_year(release_date: Option<&str>) -> Option<i32> {
    let token = release_date?.split_whitespace().next()?;
    RELEASE_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(token, fmt).ok())
        .map(|date| date.year())
}

// ---------------------------------------------------------------------------
// Poster download
// ---------------------------------------------------------------------------

/// Source of poster bytes for ingestion.
#[async_trait]
pub trait PosterFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Downloads posters over HTTP(S).
pub struct HttpPosterFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpPosterFetcher {
    pub fn new(config: &IngestConfig, max_bytes: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| CinematchError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self { client, max_bytes })
    }
}

#[async_trait]
impl PosterFetcher for HttpPosterFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(CinematchError::Fetch(format!(
                "unsupported poster URL scheme: {}",
                url
            )));
        }

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CinematchError::Fetch(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CinematchError::Fetch(format!("{} returned {}", url, status)));
        }
        if let Some(len) = response.content_length() {
            if len as usize > self.max_bytes {
                return Err(CinematchError::Fetch(format!(
                    "{} is {} bytes, limit is {}",
                    url, len, self.max_bytes
                )));
            }
        }

        // Chunked bodies carry no length up front; stop reading at the limit.
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| CinematchError::Fetch(format!("{}: {}", url, e)))?
        {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(CinematchError::Fetch(format!(
                    "{} exceeds the {} byte limit",
                    url, self.max_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Outcome of one `insert_many` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    /// Every record of the batch was stored.
    Inserted { ids: Vec<ItemId> },
    /// The batch was rejected as a whole. Posters already stored for it
    /// are kept.
    Failed { error: String, records: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch: usize,
    #[serde(flatten)]
    pub outcome: BatchOutcome,
}

/// Summary of an ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub batches: Vec<BatchReport>,
    pub inserted: usize,
    pub failed: usize,
    /// Records stored without a poster.
    pub without_poster: usize,
    /// Records stored with a poster but no embedding.
    pub without_embedding: usize,
}

impl IngestReport {
    pub fn inserted_ids(&self) -> impl Iterator<Item = &ItemId> {
        self.batches.iter().flat_map(|b| match &b.outcome {
            BatchOutcome::Inserted { ids } => ids.as_slice(),
            BatchOutcome::Failed { .. } => &[][..],
        })
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Turns scraped movies into stored catalog records.
pub struct IngestionPipeline {
    repo: CatalogRepository,
    embedder: Arc<dyn DynImageEmbeddingService>,
    fetcher: Arc<dyn PosterFetcher>,
    batch_size: usize,
}

impl IngestionPipeline {
    pub fn new(
        repo: CatalogRepository,
        embedder: Arc<dyn DynImageEmbeddingService>,
        fetcher: Arc<dyn PosterFetcher>,
        batch_size: usize,
    ) -> Self {
        Self {
            repo,
            embedder,
            fetcher,
            batch_size: batch_size.max(1),
        }
    }

    /// Ingest `records` in order, one `insert_many` per batch.
    pub async fn ingest(&self, records: &[RawItemRecord]) -> IngestReport {
        let mut report = IngestReport::default();

        for (batch, chunk) in records.chunks(self.batch_size).enumerate() {
            let mut drafts = Vec::with_capacity(chunk.len());
            for raw in chunk {
                drafts.push(self.prepare(raw).await);
            }
            let missing_poster = drafts.iter().filter(|d| d.blob_ref.is_none()).count();
            let missing_embedding = drafts
                .iter()
                .filter(|d| d.blob_ref.is_some() && d.embedding.is_none())
                .count();

            let outcome = match self.repo.insert_many(&drafts) {
                Ok(ids) => {
                    info!(batch, count = ids.len(), "Batch inserted");
                    report.inserted += ids.len();
                    report.without_poster += missing_poster;
                    report.without_embedding += missing_embedding;
                    BatchOutcome::Inserted { ids }
                }
                Err(e) => {
                    warn!(batch, records = chunk.len(), error = %e, "Batch insert failed");
                    report.failed += chunk.len();
                    BatchOutcome::Failed {
                        error: e.to_string(),
                        records: chunk.len(),
                    }
                }
            };
            report.batches.push(BatchReport { batch, outcome });
        }

        info!(
            inserted = report.inserted,
            failed = report.failed,
            batches = report.batches.len(),
            "Ingestion finished"
        );
        report
    }

    /// Build the draft for one scraped movie. Never fails.
    pub async fn prepare(&self, raw: &RawItemRecord) -> ItemDraft {
        let mut draft = ItemDraft::manual(
            raw.metadata(),
            derive_release_year(raw.release_date.as_deref()),
        );
        if raw.release_date.is_some() && draft.release_year.is_none() {
            debug!(title = %raw.title, date = ?raw.release_date, "Unparseable release date");
        }

        let Some(url) = raw.poster_url.as_deref().filter(|u| !u.trim().is_empty()) else {
            return draft;
        };

        let bytes = match self.fetcher.fetch(url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(title = %raw.title, error = %e, "Poster download failed");
                return draft;
            }
        };

        let filename = format!("{}_poster", raw.title);
        let blob = match self.repo.blobs().put(&bytes, &filename) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(title = %raw.title, error = %e, "Poster storage failed");
                return draft;
            }
        };
        draft.blob_ref = Some(blob);

        match self.embedder.embed_boxed(&bytes).await {
            Ok(embedding) => draft.embedding = Some(embedding),
            Err(e) => warn!(title = %raw.title, error = %e, "Poster embedding failed"),
        }
        draft
    }
}
