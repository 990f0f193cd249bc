use thiserror::Error;

/// Failure to turn image bytes into an embedding vector.
///
/// `Decode` covers unreadable or unsupported image bytes; `Inference` covers
/// everything after a successful decode (tensor construction, model run,
/// unexpected output shape). Callers treat both as "no similarity signal",
/// but they are kept apart so logs show which stage failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmbedError {
    #[error("Image decode failed: {0}")]
    Decode(String),

    #[error("Embedding inference failed: {0}")]
    Inference(String),
}

/// Top-level error type for the CineMatch system.
///
/// Store failures are split into `StoreUnavailable` (the backing store
/// faulted) and `NotFound` (the store answered, but nothing matched) so that
/// callers can react differently to each.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CinematchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Embedding(#[from] EmbedError),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Poster fetch failed: {0}")]
    Fetch(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CinematchError {
    /// Convenience constructor for a missing catalog item.
    pub fn item_not_found(id: impl std::fmt::Display) -> Self {
        CinematchError::NotFound(format!("movie {}", id))
    }

    /// Whether this error came from the backing store faulting (as opposed
    /// to a lookup miss or bad input).
    pub fn is_store_fault(&self) -> bool {
        matches!(self, CinematchError::StoreUnavailable(_))
    }
}

impl From<toml::de::Error> for CinematchError {
    fn from(err: toml::de::Error) -> Self {
        CinematchError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for CinematchError {
    fn from(err: toml::ser::Error) -> Self {
        CinematchError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for CinematchError {
    fn from(err: serde_json::Error) -> Self {
        CinematchError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for CineMatch operations.
pub type Result<T> = std::result::Result<T, CinematchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CinematchError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
    }

    #[test]
    fn test_embed_error_display() {
        let err = EmbedError::Decode("bad magic bytes".to_string());
        assert_eq!(err.to_string(), "Image decode failed: bad magic bytes");

        let err = EmbedError::Inference("shape mismatch".to_string());
        assert_eq!(err.to_string(), "Embedding inference failed: shape mismatch");
    }

    #[test]
    fn test_embed_error_is_transparent() {
        let err: CinematchError = EmbedError::Decode("truncated".to_string()).into();
        assert!(matches!(err, CinematchError::Embedding(EmbedError::Decode(_))));
        assert_eq!(err.to_string(), "Image decode failed: truncated");
    }

    #[test]
    fn test_item_not_found() {
        let err = CinematchError::item_not_found("abc");
        assert_eq!(err.to_string(), "Not found: movie abc");
        assert!(!err.is_store_fault());
    }

    #[test]
    fn test_store_fault_classification() {
        assert!(CinematchError::StoreUnavailable("down".into()).is_store_fault());
        assert!(!CinematchError::NotFound("x".into()).is_store_fault());
        assert!(!CinematchError::Conflict("x".into()).is_store_fault());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CinematchError = io_err.into();
        assert!(matches!(err, CinematchError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let bad_toml = "invalid = [[[";
        let err: std::result::Result<toml::Value, _> = toml::from_str(bad_toml);
        let err: CinematchError = err.unwrap_err().into();
        assert!(matches!(err, CinematchError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let err: CinematchError = err.unwrap_err().into();
        assert!(matches!(err, CinematchError::Serialization(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let value = io_result?;
            Ok(value.to_string())
        }

        assert_eq!(inner().unwrap(), "42");
    }
}
