use thiserror::Error;

/// Errors from store operations (used by trait definitions in maestro-core).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable")]
    Unavailable,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}
