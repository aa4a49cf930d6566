use thiserror::Error;

use salespost_core::DomainError;

use crate::store::StoreError;

/// Coarse classification callers switch on (maps 1:1 to response codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Infrastructure,
}

/// Error returned by every order operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderError {
    /// Bad input or an unknown referenced record.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The order does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The order's current state forbids the request.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Concurrent writers kept winning until the retry budget ran out.
    #[error("conflict: {0}")]
    RetriesExhausted(String),

    /// Required configuration (e.g. the chart of accounts) is missing.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Storage failed; the transaction was rolled back.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl OrderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrderError::Validation(_) => ErrorKind::Validation,
            OrderError::NotFound(_) => ErrorKind::NotFound,
            OrderError::Conflict(_) | OrderError::RetriesExhausted(_) => ErrorKind::Conflict,
            OrderError::Configuration(_) => ErrorKind::Infrastructure,
            OrderError::Store(StoreError::Conflict(_)) => ErrorKind::Conflict,
            OrderError::Store(StoreError::Missing(_)) => ErrorKind::NotFound,
            OrderError::Store(StoreError::Unavailable(_) | StoreError::Corrupt(_)) => ErrorKind::Infrastructure,
        }
    }

    /// Whether running the same request again can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrderError::RetriesExhausted(_)
                | OrderError::Store(StoreError::Unavailable(_) | StoreError::Conflict(_))
        )
    }

    /// A concurrent writer won; the operation may be replayed from scratch.
    pub(crate) fn is_write_conflict(&self) -> bool {
        matches!(self, OrderError::Store(StoreError::Conflict(_)))
    }
}

impl From<DomainError> for OrderError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => OrderError::Validation(msg),
            DomainError::NotFound(msg) => OrderError::NotFound(msg),
            DomainError::Conflict(msg) | DomainError::InvariantViolation(msg) => OrderError::Conflict(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_boundary_kinds() {
        assert_eq!(OrderError::from(DomainError::validation("x")).kind(), ErrorKind::Validation);
        assert_eq!(OrderError::from(DomainError::invalid_id("x")).kind(), ErrorKind::Validation);
        assert_eq!(OrderError::from(DomainError::not_found("x")).kind(), ErrorKind::NotFound);
        assert_eq!(OrderError::from(DomainError::conflict("x")).kind(), ErrorKind::Conflict);
        assert_eq!(OrderError::from(DomainError::invariant("x")).kind(), ErrorKind::Conflict);
    }

    #[test]
    fn only_transient_store_failures_are_retryable() {
        assert!(OrderError::from(StoreError::Unavailable("timeout".into())).is_retryable());
        assert!(OrderError::from(StoreError::Conflict("stale".into())).is_retryable());
        assert!(!OrderError::from(StoreError::Corrupt("bad row".into())).is_retryable());
        assert!(!OrderError::Configuration("no receivable account".into()).is_retryable());
        assert!(!OrderError::Conflict("already confirmed".into()).is_retryable());
    }

    #[test]
    fn exhausted_retries_are_a_retryable_conflict() {
        let err = OrderError::RetriesExhausted("confirm gave up after 4 attempts".into());
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.is_retryable());
        assert!(!err.is_write_conflict());
    }

    #[test]
    fn configuration_errors_are_infrastructure() {
        let err = OrderError::Configuration("account 1100 missing".into());
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
    }
}
