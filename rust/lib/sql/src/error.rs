use thiserror::Error;

#[derive(Error, Debug)]
pub enum SQLError {
    #[error("query error: {0}")]
    Query(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("connection error: {0}")]
    Connection(String),

    /// A UNIQUE / CHECK / FOREIGN KEY constraint rejected the write.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// A guarded statement in an atomic batch matched no rows; the
    /// whole batch was rolled back. Carries the statement's label.
    #[error("no rows affected: {0}")]
    NoRowsAffected(String),
}

impl SQLError {
    /// Whether the failure is a UNIQUE constraint on the given index or
    /// column list. SQLite reports unique violations as
    /// `UNIQUE constraint failed: table.col, ...` or by index name.
    pub fn is_unique_violation(&self, needle: &str) -> bool {
        match self {
            SQLError::Constraint(msg) => msg.contains("UNIQUE") && msg.contains(needle),
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for SQLError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                SQLError::Constraint(e.to_string())
            }
            other => SQLError::Execution(other.to_string()),
        }
    }
}
