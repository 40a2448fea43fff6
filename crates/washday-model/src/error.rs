//! Error types for the model layer.

/// Errors raised while loading or validating content.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// An event effect code that does not match any known effect.
    #[error("invalid effect code: {0:?}")]
    InvalidEffect(String),

    /// The content document is not valid JSON or misses a table.
    #[error("invalid content: {0}")]
    Content(#[from] serde_json::Error),

    /// The catalog has no items, so the market could never be stocked.
    #[error("content catalog is empty")]
    EmptyCatalog,
}
