use thiserror::Error;

/// Storage-layer failure.
///
/// Any error returned inside a transaction aborts it; nothing is committed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A concurrent writer won (stale version, serialization failure,
    /// deadlock, unique violation). Retrying the whole operation can succeed.
    #[error("write conflict: {0}")]
    Conflict(String),

    /// The backend could not be reached or timed out.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A row the operation relies on does not exist.
    #[error("record not found: {0}")]
    Missing(String),

    /// A stored row could not be mapped back into the domain.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}
