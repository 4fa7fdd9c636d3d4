use thiserror::Error;

/// Errors raised by the review store, retriever and chat pipeline.
#[derive(Debug, Error)]
pub enum RagError {
    /// The dataset is missing, unreadable or malformed.
    #[error("Failed to load dataset: {0}")]
    DataLoad(String),

    /// The embedding function failed for a review or a query.
    #[error("Embedding failed: {0}")]
    Embedding(String),

    /// A query was issued before any index was built or loaded.
    #[error("Review index has not been built yet")]
    IndexNotBuilt,

    /// The persisted index was produced by a different embedding function.
    #[error("Index was built with embedder '{stored}' but '{configured}' is configured; rebuild the index")]
    IndexMismatch { stored: String, configured: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Prompt template error: {0}")]
    Template(#[from] TemplateError),

    /// The generation service returned an error or could not be reached.
    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Index storage error: {0}")]
    Storage(String),
}

impl From<std::io::Error> for RagError {
    fn from(e: std::io::Error) -> Self {
        RagError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for RagError {
    fn from(e: serde_json::Error) -> Self {
        RagError::Storage(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template is missing required slot '{0}'")]
    MissingSlot(String),

    #[error("template uses unknown slot '{0}'")]
    UnknownSlot(String),

    #[error("unbalanced brace at byte {0}")]
    UnbalancedBrace(usize),

    #[error("no value bound for slot '{0}'")]
    UnboundSlot(String),
}

pub type Result<T> = std::result::Result<T, RagError>;
