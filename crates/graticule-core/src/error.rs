use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid record {id}: {reason}")]
    InvalidRecord { id: String, reason: String },

    #[error("cache version mismatch: expected {expected}, found {found}")]
    CacheVersionMismatch { expected: String, found: String },

    #[error("duplicate reference id: {0}")]
    DuplicateId(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl Error {
    /// Build an [`Error::InvalidRecord`] for the given record id.
    pub fn invalid_record(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
