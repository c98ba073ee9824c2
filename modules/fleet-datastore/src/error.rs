use std::fmt;

/// Result type alias for datastore operations.
pub type Result<T> = std::result::Result<T, DatastoreError>;

/// The entity a name refers to, used to qualify lookup and uniqueness errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    FimSection,
    YaraSignatureGroup,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::FimSection => f.write_str("FIM section"),
            EntityKind::YaraSignatureGroup => f.write_str("YARA signature group"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DatastoreError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{kind} already exists: {name}")]
    DuplicateName { kind: EntityKind, name: String },

    #[error("{kind} not found: {name}")]
    NotFound { kind: EntityKind, name: String },

    #[error("Connection error: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("Transaction error: {0}")]
    Transaction(#[source] sqlx::Error),

    #[error("Query error: {0}")]
    Query(#[source] sqlx::Error),

    #[error("Write error: {0}")]
    Write(#[source] sqlx::Error),

    #[error("Not supported by this backend: {0}")]
    Unsupported(&'static str),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl DatastoreError {
    /// Transient infrastructure failures that can be retried unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DatastoreError::Connection(_) | DatastoreError::Query(_))
    }

    /// Classify a failure from a pool acquire or `BEGIN`.
    pub(crate) fn begin(err: sqlx::Error) -> Self {
        if is_connection_error(&err) {
            DatastoreError::Connection(err)
        } else {
            DatastoreError::Transaction(err)
        }
    }

    /// Any failure while reading, including acquiring the connection for it.
    pub(crate) fn query(err: sqlx::Error) -> Self {
        DatastoreError::Query(err)
    }

    /// Classify a failure from an insert, turning a unique violation into
    /// `DuplicateName` for the entity being written.
    pub(crate) fn insert(err: sqlx::Error, kind: EntityKind, name: &str) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DatastoreError::DuplicateName {
                    kind,
                    name: name.to_string(),
                }
            }
            _ => Self::write(err),
        }
    }

    /// Classify a failure from any other write statement.
    pub(crate) fn write(err: sqlx::Error) -> Self {
        if is_connection_error(&err) {
            DatastoreError::Connection(err)
        } else {
            DatastoreError::Write(err)
        }
    }
}

fn is_connection_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}
