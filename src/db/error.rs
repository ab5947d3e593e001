use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database connection error: {0}")]
    Connection(String),

    #[error("database query error: {0}")]
    Query(String),

    #[error("database migration error: {0}")]
    Migration(String),

    #[error("database write conflict: {0}")]
    Conflict(String),
}

impl From<diesel::result::Error> for DatabaseError {
    fn from(err: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};

        match &err {
            Error::DatabaseError(DatabaseErrorKind::SerializationFailure, info) => {
                DatabaseError::Conflict(info.message().to_string())
            }
            // SQLite reports writer contention as "database is locked"
            Error::DatabaseError(DatabaseErrorKind::Unknown, info)
                if info.message().contains("database is locked") =>
            {
                DatabaseError::Conflict(info.message().to_string())
            }
            _ => DatabaseError::Query(err.to_string()),
        }
    }
}
