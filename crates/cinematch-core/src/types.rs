use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{CinematchError, Result};

/// Identifier of a catalog item, assigned by the metadata store on insert.
pub type ItemId = Uuid;

/// Name of the identity field in stored documents.
pub const ID_FIELD: &str = "_id";

// =============================================================================
// Blob references
// =============================================================================

/// Reference to a poster image held by the blob store.
///
/// Each reference is minted by the blob store on `put`, so two records never
/// share a blob even when their poster bytes are identical.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(pub Uuid);

impl BlobRef {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| CinematchError::Validation(format!("invalid blob ref '{}': {}", s, e)))
    }
}

impl Default for BlobRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Catalog items
// =============================================================================

/// A credited cast member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastMember {
    pub name: String,
    pub role: String,
}

/// Free-form descriptive fields of a movie. Every field is optional and
/// independent of the others.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemMetadata {
    pub title: Option<String>,
    pub overview: Option<String>,
    pub release_date: Option<String>,
    pub runtime: Option<String>,
    pub status: Option<String>,
    pub original_language: Option<String>,
    pub budget: Option<String>,
    pub revenue: Option<String>,
    pub genres: Vec<String>,
    pub cast: Vec<CastMember>,
}

/// A catalog item that has not been inserted yet.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemDraft {
    #[serde(flatten)]
    pub metadata: ItemMetadata,
    pub release_year: Option<i32>,
    pub blob_ref: Option<BlobRef>,
    pub embedding: Option<Vec<f32>>,
}

impl ItemDraft {
    /// A manually created item: metadata only, no poster, no embedding.
    pub fn manual(metadata: ItemMetadata, release_year: Option<i32>) -> Self {
        Self {
            metadata,
            release_year,
            blob_ref: None,
            embedding: None,
        }
    }

    /// Serialize into a store document without an identity field.
    pub fn to_document(&self) -> Result<Map<String, Value>> {
        into_object(serde_json::to_value(self)?)
    }
}

/// One cataloged movie as persisted in the metadata store.
///
/// `embedding` is only meaningful together with `blob_ref`: a record whose
/// embedding is `None` carries no similarity signal, whatever its blob.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    #[serde(rename = "_id")]
    pub id: ItemId,
    #[serde(flatten)]
    pub metadata: ItemMetadata,
    pub release_year: Option<i32>,
    pub blob_ref: Option<BlobRef>,
    pub embedding: Option<Vec<f32>>,
}

impl ItemRecord {
    pub fn from_draft(id: ItemId, draft: ItemDraft) -> Self {
        Self {
            id,
            metadata: draft.metadata,
            release_year: draft.release_year,
            blob_ref: draft.blob_ref,
            embedding: draft.embedding,
        }
    }

    /// Decode a store document.
    pub fn from_document(doc: Map<String, Value>) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(doc))?)
    }

    /// Whether this record can take part in similarity ranking.
    pub fn has_signal(&self) -> bool {
        self.embedding.is_some()
    }
}

fn into_object(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(CinematchError::Serialization(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

// =============================================================================
// Ingestion input
// =============================================================================

/// A scraped movie as handed over by the scraping subsystem.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawItemRecord {
    pub title: String,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub genres: Option<Vec<String>>,
    #[serde(default)]
    pub cast: Option<Vec<CastMember>>,
    #[serde(default, alias = "poster")]
    pub poster_url: Option<String>,
    #[serde(default)]
    pub runtime: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub original_language: Option<String>,
    #[serde(default)]
    pub budget: Option<String>,
    #[serde(default)]
    pub revenue: Option<String>,
}

impl RawItemRecord {
    /// Split off the descriptive fields; the poster URL is consumed by ingestion.
    pub fn metadata(&self) -> ItemMetadata {
        ItemMetadata {
            title: Some(self.title.clone()),
            overview: self.overview.clone(),
            release_date: self.release_date.clone(),
            runtime: self.runtime.clone(),
            status: self.status.clone(),
            original_language: self.original_language.clone(),
            budget: self.budget.clone(),
            revenue: self.revenue.clone(),
            genres: self.genres.clone().unwrap_or_default(),
            cast: self.cast.clone().unwrap_or_default(),
        }
    }
}

// =============================================================================
// Edits
// =============================================================================

/// Metadata changes requested by an edit. `None` leaves a field untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemEdit {
    pub title: Option<String>,
    pub overview: Option<String>,
    pub release_date: Option<String>,
    pub runtime: Option<String>,
    pub status: Option<String>,
    pub original_language: Option<String>,
    pub budget: Option<String>,
    pub revenue: Option<String>,
    pub genres: Option<Vec<String>>,
    pub cast: Option<Vec<CastMember>>,
}

impl ItemEdit {
    /// The fields to overwrite, keyed by document field name.
    pub fn to_fields(&self) -> Result<Map<String, Value>> {
        let mut fields = Map::new();
        let mut put = |name: &str, value: Option<Value>| {
            if let Some(v) = value {
                fields.insert(name.to_string(), v);
            }
        };
        put("title", self.title.clone().map(Value::String));
        put("overview", self.overview.clone().map(Value::String));
        put("release_date", self.release_date.clone().map(Value::String));
        put("runtime", self.runtime.clone().map(Value::String));
        put("status", self.status.clone().map(Value::String));
        put(
            "original_language",
            self.original_language.clone().map(Value::String),
        );
        put("budget", self.budget.clone().map(Value::String));
        put("revenue", self.revenue.clone().map(Value::String));
        if let Some(genres) = &self.genres {
            fields.insert("genres".to_string(), serde_json::to_value(genres)?);
        }
        if let Some(cast) = &self.cast {
            fields.insert("cast".to_string(), serde_json::to_value(cast)?);
        }
        Ok(fields)
    }
}
