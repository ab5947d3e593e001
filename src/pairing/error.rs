use thiserror::Error;

use crate::db::DatabaseError;
use crate::db::models::PairingStatus;

/// Failure taxonomy of the pairing coordinator. Every variant is a genuine
/// precondition failure except `Transient`, which callers may retry with
/// unchanged inputs, and `Store`, which wraps an unexpected storage error.
#[derive(Debug, Error)]
pub enum PairingError {
    #[error("mentor and student must be different users")]
    SelfPairing,

    #[error("mentor not found or not accepting requests")]
    MentorNotFound,

    #[error("mentor has no open slot for new requests")]
    NoCapacity,

    #[error("a pending or accepted pairing already exists between these users")]
    DuplicatePairing,

    #[error("pairing not found")]
    NotFound,

    #[error("no directory entry exists for this mentor")]
    DirectoryNotFound,

    #[error("caller is not an authorized actor for this transition")]
    Forbidden,

    #[error("pairing is {}, transition requires {}", .actual.as_str(), .required.as_str())]
    InvalidState {
        required: PairingStatus,
        actual: PairingStatus,
    },

    #[error("mentor is at capacity")]
    AtCapacity,

    #[error("storage conflict, safe to retry")]
    Transient,

    #[error("storage error: {0}")]
    Store(DatabaseError),
}

impl From<DatabaseError> for PairingError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Conflict(_) => PairingError::Transient,
            other => PairingError::Store(other),
        }
    }
}

// Needed by diesel transaction plumbing: commit/rollback errors surface as
// `diesel::result::Error` inside the transaction closure.
impl From<diesel::result::Error> for PairingError {
    fn from(err: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};

        // The only non-key unique index is the live-pair backstop, so a
        // unique violation on insert means a concurrent duplicate request.
        if let Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) = &err {
            return PairingError::DuplicatePairing;
        }
        PairingError::from(DatabaseError::from(err))
    }
}
