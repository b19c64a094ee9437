use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("subscription to {table} failed: {reason}")]
    SubscribeFailed { table: String, reason: String },

    #[error("notification facility error: {0}")]
    Facility(String),

    #[error("auth provider error: {0}")]
    Auth(String),

    #[error("invalid refresh token")]
    InvalidRefreshToken,

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = RelayError> = std::result::Result<T, E>;
