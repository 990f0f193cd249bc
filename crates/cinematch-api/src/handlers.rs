//! Route handler functions for all API endpoints.
//!
//! Each handler extracts path/query/body data via axum extractors,
//! calls into the services held by AppState, and returns JSON responses.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use cinematch_core::types::{
    BlobRef, CastMember, ItemDraft, ItemEdit, ItemId, ItemMetadata, ItemRecord, RawItemRecord,
};
use cinematch_vector::{derive_release_year, EditReport, IngestReport, PosterUpload, SearchMatch};

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Query parameter and request types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<usize>,
}

/// Body of POST /recommendations. Exactly one of `embedding` and `id`.
#[derive(Debug, Deserialize)]
pub struct RecommendRequest {
    pub embedding: Option<Vec<f32>>,
    pub id: Option<ItemId>,
    pub limit: Option<usize>,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub item_count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MovieSummary {
    pub id: ItemId,
    pub title: Option<String>,
    pub overview: Option<String>,
    pub release_year: Option<i32>,
    pub has_poster: bool,
    pub has_embedding: bool,
}

impl From<&ItemRecord> for MovieSummary {
    fn from(record: &ItemRecord) -> Self {
        Self {
            id: record.id,
            title: record.metadata.title.clone(),
            overview: record.metadata.overview.clone(),
            release_year: record.release_year,
            has_poster: record.blob_ref.is_some(),
            has_embedding: record.has_signal(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MoviesResponse {
    pub movies: Vec<MovieSummary>,
    pub total: usize,
}

/// Full record minus the raw embedding vector.
#[derive(Debug, Serialize, Deserialize)]
pub struct MovieDetail {
    pub id: ItemId,
    #[serde(flatten)]
    pub metadata: ItemMetadata,
    pub release_year: Option<i32>,
    pub blob_ref: Option<BlobRef>,
    pub embedding_dimensions: Option<usize>,
}

impl From<ItemRecord> for MovieDetail {
    fn from(record: ItemRecord) -> Self {
        Self {
            id: record.id,
            metadata: record.metadata,
            release_year: record.release_year,
            blob_ref: record.blob_ref,
            embedding_dimensions: record.embedding.as_ref().map(Vec::len),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchMatch>,
    pub limit: usize,
}

// =============================================================================
// Health
// =============================================================================

/// GET /health - liveness plus catalog size.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let (status, item_count) = match state.repo.count() {
        Ok(count) => ("healthy", count),
        Err(_) => ("degraded", 0),
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        item_count,
    })
}

// =============================================================================
// Catalog
// =============================================================================

/// GET /movies - every record, in insertion order.
pub async fn list_movies(State(state): State<AppState>) -> Result<Json<MoviesResponse>, ApiError> {
    let records = state.repo.list()?;
    let movies: Vec<MovieSummary> = records.iter().map(MovieSummary::from).collect();
    Ok(Json(MoviesResponse {
        total: movies.len(),
        movies,
    }))
}

/// GET /movies/{id}
pub async fn get_movie(
    State(state): State<AppState>,
    Path(id): Path<ItemId>,
) -> Result<Json<MovieDetail>, ApiError> {
    Ok(Json(state.repo.get(id)?.into()))
}

/// POST /movies - manual creation; the record starts without a poster.
pub async fn create_movie(
    State(state): State<AppState>,
    Json(metadata): Json<ItemMetadata>,
) -> Result<impl IntoResponse, ApiError> {
    if metadata
        .title
        .as_deref()
        .map_or(true, |t| t.trim().is_empty())
    {
        return Err(ApiError::BadRequest("'title' must not be empty".to_string()));
    }

    let release_year = derive_release_year(metadata.release_date.as_deref());
    let draft = ItemDraft::manual(metadata, release_year);
    let id = state.repo.insert(&draft)?;
    info!(id = %id, "Movie created");

    let detail: MovieDetail = ItemRecord::from_draft(id, draft).into();
    Ok((StatusCode::CREATED, Json(detail)))
}

/// PUT /movies/{id} - multipart edit through the update protocol.
///
/// Text fields name the metadata to overwrite. `genres` is comma-separated,
/// `cast` is a JSON array. A non-empty `poster` file replaces the poster.
pub async fn update_movie(
    State(state): State<AppState>,
    Path(id): Path<ItemId>,
    mut multipart: Multipart,
) -> Result<Json<EditReport>, ApiError> {
    let mut edit = ItemEdit::default();
    let mut poster: Option<PosterUpload> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Multipart error: {}", e)))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if name == "poster" {
            let filename = field
                .file_name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}_poster", id));
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("Failed to read poster: {}", e)))?;
            if !bytes.is_empty() {
                poster = Some(PosterUpload {
                    bytes: bytes.to_vec(),
                    filename,
                });
            }
            continue;
        }

        let text = field
            .text()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read '{}': {}", name, e)))?;
        apply_form_field(&mut edit, &name, text)?;
    }

    let report = state.updates.apply(id, &edit, poster).await?;
    Ok(Json(report))
}

/// Copy one text form field into `edit`. Unknown fields are ignored.
fn apply_form_field(edit: &mut ItemEdit, name: &str, text: String) -> Result<(), ApiError> {
    match name {
        "title" => edit.title = Some(text),
        "overview" => edit.overview = Some(text),
        "release_date" => edit.release_date = Some(text),
        "runtime" => edit.runtime = Some(text),
        "status" => edit.status = Some(text),
        "original_language" => edit.original_language = Some(text),
        "budget" => edit.budget = Some(text),
        "revenue" => edit.revenue = Some(text),
        "genres" => {
            edit.genres = Some(
                text.split(',')
                    .map(str::trim)
                    .filter(|g| !g.is_empty())
                    .map(str::to_string)
                    .collect(),
            )
        }
        "cast" => {
            let cast: Vec<CastMember> = serde_json::from_str(&text)
                .map_err(|e| ApiError::BadRequest(format!("Invalid 'cast': {}", e)))?;
            edit.cast = Some(cast);
        }
        _ => {}
    }
    Ok(())
}

/// DELETE /movies/{id} - remove the record and release its poster.
pub async fn delete_movie(
    State(state): State<AppState>,
    Path(id): Path<ItemId>,
) -> Result<StatusCode, ApiError> {
    state.repo.delete(id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /movies/{id}/poster - raw poster bytes.
pub async fn get_poster(
    State(state): State<AppState>,
    Path(id): Path<ItemId>,
) -> Result<impl IntoResponse, ApiError> {
    let bytes = state.repo.poster(id)?;
    let content_type = image::guess_format(&bytes)
        .map(|f| f.to_mime_type())
        .unwrap_or("application/octet-stream");
    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

// =============================================================================
// Search
// =============================================================================

/// POST /search/poster - rank the catalog against an uploaded poster.
pub async fn search_poster(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
    mut multipart: Multipart,
) -> Result<Json<SearchResponse>, ApiError> {
    let mut poster: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Multipart error: {}", e)))?
    {
        if field.name() == Some("poster") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("Failed to read poster: {}", e)))?;
            poster = Some(bytes.to_vec());
        }
    }

    let poster = poster
        .filter(|b| !b.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing 'poster' file".to_string()))?;

    let limit = state.search.clamp_limit(params.limit);
    let results = state.search.search_by_poster(&poster, Some(limit)).await?;
    Ok(Json(SearchResponse { results, limit }))
}

/// POST /recommendations - rank against a supplied vector or a stored movie.
pub async fn recommendations(
    State(state): State<AppState>,
    Json(body): Json<RecommendRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let limit = state.search.clamp_limit(body.limit);
    let results = match (body.embedding, body.id) {
        (Some(embedding), None) => state.search.recommend(&embedding, Some(limit))?,
        (None, Some(id)) => state.search.recommend_for(id, Some(limit))?,
        (Some(_), Some(_)) => {
            return Err(ApiError::BadRequest(
                "Provide either 'embedding' or 'id', not both".to_string(),
            ))
        }
        (None, None) => {
            return Err(ApiError::BadRequest(
                "One of 'embedding' or 'id' is required".to_string(),
            ))
        }
    };
    Ok(Json(SearchResponse { results, limit }))
}

// =============================================================================
// Ingest
// =============================================================================

/// POST /ingest - store a JSON array of scraped movies.
pub async fn ingest(
    State(state): State<AppState>,
    Json(records): Json<Vec<RawItemRecord>>,
) -> Result<Json<IngestReport>, ApiError> {
    if records.iter().any(|r| r.title.trim().is_empty()) {
        return Err(ApiError::BadRequest(
            "every record needs a non-empty 'title'".to_string(),
        ));
    }
    let report = state.pipeline.ingest(&records).await;
    Ok(Json(report))
}
