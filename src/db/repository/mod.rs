//! Transactional data access, split by the subsystem that consumes it so no
//! caller depends on operations it never uses.
//!
//! Functions take `&mut PgConnection`, which both a pooled connection and an
//! open `Transaction` deref to; read-only startup helpers take the pool.

pub mod incidents;
pub mod notifications;
pub mod pings;
pub mod regions;
pub mod scheduling;

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// A unique index rejected the write. The incident engine treats this as
    /// an expected race outcome, not a failure.
    #[error("unique constraint violated")]
    UniqueViolation(#[source] sqlx::Error),
    #[error("expected to write {expected} rows, wrote {written}")]
    RowCountMismatch { expected: u64, written: u64 },
    #[error("storage operation timed out")]
    Timeout,
    #[error(transparent)]
    Storage(sqlx::Error),
}

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return RepoError::UniqueViolation(err);
            }
        }
        RepoError::Storage(err)
    }
}

impl RepoError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, RepoError::UniqueViolation(_))
    }
}
