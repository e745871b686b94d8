use thiserror::Error;

pub type Result<T> = std::result::Result<T, EscrowError>;

/// Error taxonomy for the escrow core.
///
/// `Validation` covers every condition the HTTP layer should map to a 4xx
/// (missing fields, malformed enums, not-found lookups, out-of-scope access).
/// Everything else propagates unmodified for generic 5xx handling.
#[derive(Error, Debug)]
pub enum EscrowError {
    #[error("{message}")]
    Validation {
        message: String,
        status: u16,
        details: Vec<String>,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("storage error: {0}")]
    Rocks(#[from] rocksdb::Error),
    #[error("storage error: {0}")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl EscrowError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            status: 422,
            details: Vec::new(),
        }
    }

    pub fn validation_with_details(message: impl Into<String>, details: Vec<String>) -> Self {
        Self::Validation {
            message: message.into(),
            status: 422,
            details,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            status: 404,
            details: Vec::new(),
        }
    }

    pub fn internal(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Internal(Box::new(err))
    }

    /// True for any caller-facing validation condition, not-found included.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Validation { status: 404, .. })
    }
}
