use parley_core::{ApiError, ErrorKind, KeyError, ObjectClass};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("storage transaction failed: {0}")]
    Transaction(String),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("no search index for class {0}")]
    IndexNotImplemented(ObjectClass),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        table: &'static str,
        column: &'static str,
        detail: String,
    },

    #[error("database is closed")]
    Closed,

    #[error("background task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(e: r2d2::Error) -> Self {
        StoreError::Pool(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Task(e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ApiError::not_found(format!("{what} not found")),
            StoreError::AlreadyExists(what) => {
                ApiError::new(ErrorKind::AlreadyExists, format!("{what} already exists"))
            }
            StoreError::IndexNotImplemented(class) => ApiError::new(
                ErrorKind::IndexNotImplemented,
                format!("Search index for {class} is not implemented"),
            ),
            StoreError::InvalidRequest(msg) => ApiError::invalid_request(msg),
            StoreError::Key(e) => e.into(),
            StoreError::Transaction(msg) => ApiError::new(ErrorKind::StorageTransactionFailed, msg),
            other => ApiError::internal(other.to_string()),
        }
    }
}
