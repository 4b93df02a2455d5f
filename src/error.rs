use thiserror::Error;

/// Errors raised by the store, its sessions and the backend boundary.
///
/// The type is `Clone` so a single failure can be handed to every caller
/// waiting on the same gated computation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A descriptor or collaborator is missing or malformed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A reduce merge did not collapse its group into exactly one row.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Optimistic concurrency check failed on a checked save.
    #[error(
        "concurrency conflict on {collection}:{id} (expected version {expected}, actual {actual})"
    )]
    Concurrency {
        collection: String,
        id: i64,
        expected: i64,
        actual: i64,
    },

    /// Uniqueness or foreign-key violation reported by the backend.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// The session has already been disposed.
    #[error("session has been disposed")]
    Disposed,

    /// The caller passed something the store cannot persist.
    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
