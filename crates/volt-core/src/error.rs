use thiserror::Error;

/// Core error type for volt operations.
#[derive(Error, Debug)]
pub enum VoltError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Key already exists: {0}")]
    KeyExists(String),

    #[error("Compare failed: {0}")]
    CompareFailed(String),

    #[error("No cluster members available")]
    NoMembers,

    #[error("Not the active director")]
    NotDirector,

    #[error("Component error: {0}")]
    Component(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VoltError {
    /// Whether the error is the store's "key not found" outcome.
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound(_))
    }

    /// Whether a conditional write was rejected because another writer got there first.
    pub fn is_lost_race(&self) -> bool {
        matches!(self, Self::KeyExists(_) | Self::CompareFailed(_))
    }
}

impl From<serde_json::Error> for VoltError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            VoltError::Deserialization(e.to_string())
        } else {
            VoltError::Serialization(e.to_string())
        }
    }
}

/// Result type alias using VoltError.
pub type Result<T> = std::result::Result<T, VoltError>;
