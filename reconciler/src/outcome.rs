use crate::upstream::UpstreamError;

/// Why a key could not be resolved.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Failure {
    #[error("record not found")]
    NotFound,

    #[error(transparent)]
    Upstream(UpstreamError),

    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl From<UpstreamError> for Failure {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::NotFound => Failure::NotFound,
            err => Failure::Upstream(err),
        }
    }
}

/// Result of resolving one key.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<R> {
    /// Served from the store.
    Hit(R),
    /// Fetched from upstream. Persisting it was attempted but may have failed.
    Fetched(R),
    Failed(Failure),
}

impl<R> Outcome<R> {
    pub fn record(&self) -> Option<&R> {
        match self {
            Outcome::Hit(record) | Outcome::Fetched(record) => Some(record),
            Outcome::Failed(_) => None,
        }
    }

    pub fn into_record(self) -> Option<R> {
        match self {
            Outcome::Hit(record) | Outcome::Fetched(record) => Some(record),
            Outcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Outcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Outcome::Hit(_))
    }

    pub fn is_fetched(&self) -> bool {
        matches!(self, Outcome::Fetched(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

impl<R> From<Result<R, Failure>> for Outcome<R> {
    fn from(result: Result<R, Failure>) -> Self {
        match result {
            Ok(record) => Outcome::Fetched(record),
            Err(failure) => Outcome::Failed(failure),
        }
    }
}
