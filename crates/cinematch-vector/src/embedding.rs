//! Image embedding service trait and implementations.
//!
//! - `OnnxImageEmbedder` runs a vision model (ResNet-style ONNX export) via
//!   ort. This is the production embedding backend.
//! - `MockImageEmbedding` pools the preprocessed pixels into a fixed number of
//!   buckets. It is deterministic and needs no model file, which makes it the
//!   test backend and the fallback when no model is configured.

use std::path::Path;
use std::sync::{Arc, Mutex};

use ort::session::Session;
use ort::value::TensorRef;
use tracing::{info, warn};

use cinematch_core::config::EmbeddingConfig;
use cinematch_core::error::{CinematchError, EmbedError};

use crate::preprocess::Preprocessor;

/// Service turning encoded image bytes into fixed-length vectors.
pub trait ImageEmbeddingService: Send + Sync {
    /// Embed one image. Identical bytes always yield identical vectors.
    fn embed(
        &self,
        image: &[u8],
    ) -> impl std::future::Future<Output = Result<Vec<f32>, EmbedError>> + Send;

    /// Length of every vector this service produces.
    fn dimensions(&self) -> usize;
}

/// Object-safe version of [`ImageEmbeddingService`] for dynamic dispatch.
///
/// `ImageEmbeddingService::embed` returns `impl Future`, so it cannot be
/// used behind `dyn`. This trait boxes the future instead. Every
/// `ImageEmbeddingService` gets it through the blanket impl below.
pub trait DynImageEmbeddingService: Send + Sync {
    fn embed_boxed<'a>(
        &'a self,
        image: &'a [u8],
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>, EmbedError>> + Send + 'a>>;

    fn dimensions(&self) -> usize;
}

impl<T: ImageEmbeddingService> DynImageEmbeddingService for T {
    fn embed_boxed<'a>(
        &'a self,
        image: &'a [u8],
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>, EmbedError>> + Send + 'a>> {
        Box::pin(self.embed(image))
    }

    fn dimensions(&self) -> usize {
        ImageEmbeddingService::dimensions(self)
    }
}

/// Scale `v` to unit length in place. A zero vector is left as is.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Pick the embedding backend described by `config`.
///
/// A configured model that fails to load is logged and replaced by the
/// pooled backend so the service still starts.
pub fn embedder_from_config(config: &EmbeddingConfig) -> Arc<dyn DynImageEmbeddingService> {
    if let Some(path) = &config.model_path {
        match OnnxImageEmbedder::from_file(Path::new(path), config) {
            Ok(onnx) => return Arc::new(onnx),
            Err(e) => warn!(
                model = %path,
                error = %e,
                "ONNX model unavailable, falling back to pooled embeddings"
            ),
        }
    } else {
        warn!("No embedding model configured, using pooled embeddings");
    }
    Arc::new(MockImageEmbedding::from_config(config))
}

// ---------------------------------------------------------------------------
// OnnxImageEmbedder - real ONNX Runtime inference
// ---------------------------------------------------------------------------

/// ONNX Runtime-backed image embedder.
///
/// The model takes one f32 input of shape `[1, 3, crop, crop]` and produces
/// a feature tensor whose flattened length must equal `dimensions`.
pub struct OnnxImageEmbedder {
    session: Arc<Mutex<Session>>,
    preprocessor: Preprocessor,
    dimensions: usize,
}

impl std::fmt::Debug for OnnxImageEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxImageEmbedder")
            .field("preprocessor", &self.preprocessor)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl OnnxImageEmbedder {
    pub fn from_file(model_path: &Path, config: &EmbeddingConfig) -> Result<Self, CinematchError> {
        if !model_path.exists() {
            return Err(CinematchError::Config(format!(
                "ONNX model not found at {}",
                model_path.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e| CinematchError::Config(format!("ONNX session builder: {}", e)))?
            .with_intra_threads(config.intra_threads.max(1))
            .map_err(|e| CinematchError::Config(format!("ONNX set threads: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| CinematchError::Config(format!("ONNX load model: {}", e)))?;

        info!(
            model = %model_path.display(),
            dimensions = config.dimensions,
            crop = config.crop,
            "Loaded ONNX image model"
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            preprocessor: Preprocessor::from_config(config),
            dimensions: config.dimensions,
        })
    }

    fn embed_sync(
        session: &Mutex<Session>,
        preprocessor: Preprocessor,
        dimensions: usize,
        image: &[u8],
    ) -> Result<Vec<f32>, EmbedError> {
        let tensor = preprocessor.tensor(image)?;
        let input = TensorRef::from_array_view(&tensor)
            .map_err(|e| EmbedError::Inference(format!("input tensor: {}", e)))?;

        let mut session = session
            .lock()
            .map_err(|e| EmbedError::Inference(format!("Session lock poisoned: {}", e)))?;
        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| EmbedError::Inference(format!("ONNX inference failed: {}", e)))?;

        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedError::Inference(format!("Extract features: {}", e)))?;

        if data.len() != dimensions {
            return Err(EmbedError::Inference(format!(
                "model produced {} values, expected {}",
                data.len(),
                dimensions
            )));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(EmbedError::Inference("model produced non-finite values".to_string()));
        }

        let mut features = data.to_vec();
        l2_normalize(&mut features);
        Ok(features)
    }
}

impl ImageEmbeddingService for OnnxImageEmbedder {
    async fn embed(&self, image: &[u8]) -> Result<Vec<f32>, EmbedError> {
        // Decode and inference are CPU-bound; run on a blocking thread.
        let session = Arc::clone(&self.session);
        let preprocessor = self.preprocessor;
        let dimensions = self.dimensions;
        let bytes = image.to_vec();

        tokio::task::spawn_blocking(move || {
            Self::embed_sync(&session, preprocessor, dimensions, &bytes)
        })
        .await
        .map_err(|e| EmbedError::Inference(format!("Embedding task panicked: {}", e)))?
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ---------------------------------------------------------------------------
// MockImageEmbedding - deterministic pixel pooling
// ---------------------------------------------------------------------------

/// Embedder that average-pools the normalized tensor into `dimensions`
/// contiguous buckets, then L2-normalizes.
///
/// Visually similar images land close together, identical images land on
/// the same vector.
#[derive(Debug, Clone)]
pub struct MockImageEmbedding {
    preprocessor: Preprocessor,
    dimensions: usize,
}

impl MockImageEmbedding {
    pub fn new(dimensions: usize) -> Self {
        Self::with_preprocessor(dimensions, Preprocessor::default())
    }

    pub fn with_preprocessor(dimensions: usize, preprocessor: Preprocessor) -> Self {
        Self {
            preprocessor,
            dimensions: dimensions.max(1),
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self::with_preprocessor(config.dimensions, Preprocessor::from_config(config))
    }

    fn pool(&self, values: &[f32]) -> Vec<f32> {
        let mut sums = vec![0.0f64; self.dimensions];
        let mut counts = vec![0usize; self.dimensions];
        let len = values.len().max(1);
        for (i, v) in values.iter().enumerate() {
            let bucket = i * self.dimensions / len;
            sums[bucket] += *v as f64;
            counts[bucket] += 1;
        }

        let mut pooled: Vec<f32> = sums
            .iter()
            .zip(&counts)
            .map(|(s, &n)| if n == 0 { 0.0 } else { (s / n as f64) as f32 })
            .collect();
        l2_normalize(&mut pooled);
        pooled
    }
}

impl Default for MockImageEmbedding {
    fn default() -> Self {
        Self::new(512)
    }
}

impl ImageEmbeddingService for MockImageEmbedding {
    async fn embed(&self, image: &[u8]) -> Result<Vec<f32>, EmbedError> {
        let service = self.clone();
        let bytes = image.to_vec();

        tokio::task::spawn_blocking(move || {
            let tensor = service.preprocessor.tensor(&bytes)?;
            let values = tensor
                .as_slice()
                .ok_or_else(|| EmbedError::Inference("tensor is not contiguous".to_string()))?;
            Ok(service.pool(values))
        })
        .await
        .map_err(|e| EmbedError::Inference(format!("Embedding task panicked: {}", e)))?
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
