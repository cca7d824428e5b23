//! Database error classification
//!
//! Wraps sqlx errors into a small set of kinds the rest of the service can
//! act on (unique violations map to domain conflicts, connection failures
//! are retryable).

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    /// A UNIQUE constraint was violated. `constraint` carries the
    /// constraint or index name when the driver reports one.
    UniqueViolation { constraint: String },
    /// Query expected a row and found none
    NotFound,
    /// Connection or pool failure (retryable)
    Connection { message: String },
    /// Pool exhausted / acquire timed out (retryable)
    PoolTimeout,
    /// Anything else
    Unknown { message: String },
}

#[derive(Debug, Clone)]
pub struct DatabaseError {
    kind: DatabaseErrorKind,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> &DatabaseErrorKind {
        &self.kind
    }

    /// Classify a raw sqlx error.
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound,
            sqlx::Error::PoolTimedOut => DatabaseErrorKind::PoolTimeout,
            sqlx::Error::Io(e) => DatabaseErrorKind::Connection {
                message: e.to_string(),
            },
            sqlx::Error::PoolClosed => DatabaseErrorKind::Connection {
                message: "connection pool closed".to_string(),
            },
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    DatabaseErrorKind::UniqueViolation {
                        constraint: db_err
                            .constraint()
                            .map(|c| c.to_string())
                            .unwrap_or_else(|| db_err.message().to_string()),
                    }
                } else {
                    DatabaseErrorKind::Unknown {
                        message: db_err.message().to_string(),
                    }
                }
            }
            other => DatabaseErrorKind::Unknown {
                message: other.to_string(),
            },
        };

        Self { kind }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::UniqueViolation { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::NotFound)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DatabaseErrorKind::Connection { .. } | DatabaseErrorKind::PoolTimeout
        )
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DatabaseErrorKind::UniqueViolation { constraint } => {
                write!(f, "unique constraint violated: {}", constraint)
            }
            DatabaseErrorKind::NotFound => write!(f, "row not found"),
            DatabaseErrorKind::Connection { message } => {
                write!(f, "database connection error: {}", message)
            }
            DatabaseErrorKind::PoolTimeout => write!(f, "database pool acquire timed out"),
            DatabaseErrorKind::Unknown { message } => write!(f, "database error: {}", message),
        }
    }
}

impl std::error::Error for DatabaseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        let err = DatabaseError::from_sqlx(sqlx::Error::RowNotFound);
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_pool_timeout_is_retryable() {
        let err = DatabaseError::from_sqlx(sqlx::Error::PoolTimedOut);
        assert!(err.is_retryable());
        assert!(!err.is_unique_violation());
    }

    #[test]
    fn test_unique_violation_display() {
        let err = DatabaseError::new(DatabaseErrorKind::UniqueViolation {
            constraint: "mpesa_transactions.checkout_request_id".to_string(),
        });
        assert!(err.is_unique_violation());
        assert!(err.to_string().contains("checkout_request_id"));
    }
}
