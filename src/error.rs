use thiserror::Error;

/// Errors raised by the store, the generator and the aggregation engine.
///
/// Every variant is fatal for the run that raised it: nothing is retried and
/// no partial results are returned.
#[derive(Debug, Error)]
pub enum Error {
    /// Query, connectivity or constraint failure reported by SQLite.
    /// Referential errors (child row with a missing parent) surface here as
    /// foreign-key constraint violations.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("invalid scale: {field} must be greater than zero")]
    InvalidScale { field: &'static str },

    #[error("worker thread panicked")]
    WorkerPanicked,

    #[error("connection pool lock poisoned")]
    PoolPoisoned,
}

impl Error {
    /// True when SQLite rejected the write because of a constraint
    /// (foreign key, primary key).
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Error::Store(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
