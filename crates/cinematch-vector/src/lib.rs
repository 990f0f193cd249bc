//! CineMatch vector crate - poster embedding, similarity ranking, search,
//! the edit protocol, and the ingestion pipeline.
//!
//! Embeddings come from an ONNX image model when one is configured and from
//! a deterministic pooled mock otherwise. Ranking is a full cosine scan of
//! the catalog.

pub mod embedding;
pub mod pipeline;
pub mod preprocess;
pub mod ranker;
pub mod search;
pub mod update;

#[cfg(test)]
mod test_support;

pub use embedding::{
    embedder_from_config, DynImageEmbeddingService, ImageEmbeddingService, MockImageEmbedding,
    OnnxImageEmbedder,
};
pub use pipeline::{
    derive_release_year, BatchOutcome, BatchReport, HttpPosterFetcher, IngestReport,
    IngestionPipeline, PosterFetcher,
};
pub use preprocess::Preprocessor;
pub use ranker::{cosine_similarity, rank, ScoredItem};
pub use search::{PosterSearch, SearchMatch};
pub use update::{
    next_state, EditReport, FailureKind, PosterUpload, StepOutcome, UpdateProtocol, UpdateState,
};
