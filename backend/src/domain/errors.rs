use thiserror::Error;

/// Failures the REST layer maps to client errors.
///
/// Services return these wrapped in `anyhow::Error`; anything else is
/// treated as an internal failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),
}
