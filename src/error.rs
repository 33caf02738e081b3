//! Failure taxonomy shared by every subsystem.

use thiserror::Error;

/// Closed set of failure kinds. HTTP status mapping lives in the API layer;
/// nothing in here knows about status codes.
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed input at a public boundary. Raised before any side effect.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced entity (user, rule, record) does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The caller does not own the referenced entity.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Plan quota exceeded or a plan-gated operation.
    #[error("{0}")]
    Quota(String),

    /// A database-layer failure. `retryable` is classified once at
    /// construction so callers can apply the retry policy uniformly.
    #[error("storage error: {source}")]
    Storage {
        #[source]
        source: sqlx::Error,
        retryable: bool,
    },
}

impl AppError {
    pub fn storage(source: sqlx::Error) -> Self {
        let retryable = is_retryable(&source);
        AppError::Storage { source, retryable }
    }

    pub fn retryable(&self) -> bool {
        matches!(self, AppError::Storage { retryable: true, .. })
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::storage(err)
    }
}

/// Transient fault classes worth another attempt: connection-level I/O
/// problems, pool/statement timeouts, and the Postgres codes for
/// serialization failure, admin shutdown, connection exceptions, and an
/// exhausted connection slot.
pub fn is_retryable(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(code) => {
                code == "40001" || code == "57P01" || code == "53300" || code.starts_with("08")
            }
            None => false,
        },
        _ => false,
    }
}

/// Database-level rejects (constraint violations and friends) that poison a
/// single row without taking down the connection. Deadlocks (40P01) and the
/// retryable classes are fatal to the surrounding transaction, not
/// row-level; anything else raised inside a run transaction aborts the run.
pub fn is_row_level(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            let code = db.code();
            let code = code.as_deref();
            code != Some("40P01") && !is_retryable_code(code)
        }
        _ => false,
    }
}

fn is_retryable_code(code: Option<&str>) -> bool {
    match code {
        Some(code) => {
            code == "40001" || code == "57P01" || code == "53300" || code.starts_with("08")
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[derive(Debug)]
    struct FakeDbError(&'static str);

    impl fmt::Display for FakeDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "sqlstate {}", self.0)
        }
    }

    impl StdError for FakeDbError {}

    impl sqlx::error::DatabaseError for FakeDbError {
        fn message(&self) -> &str {
            "fake database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.0))
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            sqlx::error::ErrorKind::Other
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }
    }

    fn db_error(code: &'static str) -> sqlx::Error {
        sqlx::Error::Database(Box::new(FakeDbError(code)))
    }

    #[test]
    fn io_errors_are_retryable() {
        let err = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(is_retryable(&err));
        assert!(AppError::storage(err).retryable());
    }

    #[test]
    fn pool_timeout_is_retryable() {
        assert!(is_retryable(&sqlx::Error::PoolTimedOut));
    }

    #[test]
    fn row_not_found_is_not_retryable() {
        assert!(!is_retryable(&sqlx::Error::RowNotFound));
        assert!(!AppError::storage(sqlx::Error::RowNotFound).retryable());
    }

    #[test]
    fn business_errors_are_not_retryable() {
        assert!(!AppError::Quota("starter plan allows 1 rule".into()).retryable());
        assert!(!AppError::Validation("bad region".into()).retryable());
    }

    #[test]
    fn deadlock_is_fatal_not_row_level() {
        let err = db_error("40P01");
        assert!(!is_row_level(&err));
        assert!(!is_retryable(&err));
    }

    #[test]
    fn constraint_violation_is_row_level() {
        let err = db_error("23505");
        assert!(is_row_level(&err));
        assert!(!is_retryable(&err));
    }

    #[test]
    fn serialization_failure_is_retryable_not_row_level() {
        let err = db_error("40001");
        assert!(!is_row_level(&err));
        assert!(is_retryable(&err));
    }
}
