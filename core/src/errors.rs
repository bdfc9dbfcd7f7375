/// Error types for the task queue core.
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the `Store`.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            other => StoreError::Database(other.to_string()),
        }
    }
}

/// Errors surfaced by `DependencyResolver`.
#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("circular dependency detected")]
    CircularDependency { cycle_path: Vec<Uuid> },

    #[error("task not found: {0}")]
    NotFound(Uuid),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type ResolverResult<T> = Result<T, ResolverError>;

/// The unified error type QueueService and ToolServer speak. Mirrors the
/// client-facing error kinds: Validation, NotFound, InvalidState,
/// CircularDependency, Timeout, StoreError, Internal.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("circular dependency")]
    CircularDependency { cycle_path: Vec<Uuid> },

    #[error("request timed out")]
    Timeout,

    #[error("store error: {0}")]
    StoreError(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type QueueResult<T> = Result<T, QueueError>;

impl QueueError {
    /// The client-facing error kind string used in the ToolServer's JSON envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            QueueError::Validation(_) => "Validation",
            QueueError::NotFound(_) => "NotFound",
            QueueError::InvalidState(_) => "InvalidState",
            QueueError::CircularDependency { .. } => "CircularDependency",
            QueueError::Timeout => "Timeout",
            QueueError::StoreError(_) => "StoreError",
            QueueError::Internal(_) => "Internal",
        }
    }

    /// Structured `details` payload for the JSON error envelope, if any.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            QueueError::CircularDependency { cycle_path } => Some(serde_json::json!({
                "cycle_path": cycle_path,
            })),
            _ => None,
        }
    }
}

impl From<StoreError> for QueueError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => QueueError::NotFound(msg),
            other => QueueError::StoreError(other.to_string()),
        }
    }
}

impl From<ResolverError> for QueueError {
    fn from(err: ResolverError) -> Self {
        match err {
            ResolverError::CircularDependency { cycle_path } => {
                QueueError::CircularDependency { cycle_path }
            }
            ResolverError::NotFound(id) => QueueError::NotFound(id.to_string()),
            ResolverError::Store(e) => e.into(),
        }
    }
}

/// Errors surfaced by `Config` loading/validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
