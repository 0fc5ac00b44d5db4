use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("STORE_UNAVAILABLE: {0}")]
    StoreUnavailable(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("STATE_PERSISTENCE: {0}")]
    StatePersistence(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::StoreUnavailable(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
