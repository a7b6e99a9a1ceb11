//! Appointment-request lifecycle.
//!
//! Intake → (token link) → confirmation or staff status → backfill of
//! appointments booked outside intake.

mod confirm;
mod direct;
mod reconcile;
mod requests;
mod tokens;

pub use confirm::*;
pub use direct::*;
pub use reconcile::*;
pub use requests::*;
pub use tokens::*;

pub(crate) use reconcile::backfill_in;

use thiserror::Error;

use crate::db::DbError;
use crate::identity::IdentityError;

/// Lifecycle errors.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

impl From<IdentityError> for LifecycleError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Database(e) => LifecycleError::Database(e),
            IdentityError::InsufficientData(msg) => LifecycleError::Validation(msg),
        }
    }
}

/// Coarse error class for the collaborator boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    Validation,
    Persistence,
}

impl ErrorKind {
    /// HTTP-equivalent status code.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidState => 409,
            ErrorKind::Validation => 400,
            ErrorKind::Persistence => 500,
        }
    }
}

impl LifecycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LifecycleError::NotFound(_) | LifecycleError::Database(DbError::NotFound(_)) => ErrorKind::NotFound,
            LifecycleError::InvalidState(_) => ErrorKind::InvalidState,
            LifecycleError::Validation(_) => ErrorKind::Validation,
            LifecycleError::Database(_) => ErrorKind::Persistence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(LifecycleError::NotFound("x".into()).kind().http_status(), 404);
        assert_eq!(LifecycleError::InvalidState("x".into()).kind().http_status(), 409);
        assert_eq!(LifecycleError::Validation("x".into()).kind().http_status(), 400);
        assert_eq!(
            LifecycleError::Database(DbError::Constraint("x".into())).kind(),
            ErrorKind::Persistence
        );
        assert_eq!(
            LifecycleError::Database(DbError::NotFound("x".into())).kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_identity_error_mapping() {
        let err: LifecycleError = IdentityError::InsufficientData("no email".into()).into();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
