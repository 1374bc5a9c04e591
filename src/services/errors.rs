use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session {0} not found")]
    NotFound(String),
    #[error("Access to session {0} denied")]
    Forbidden(String),
    #[error("Session {0} already exists")]
    AlreadyExists(String),
    #[error("Session {0} is already completed")]
    Completed(String),
    #[error("Invalid session id: {0}")]
    InvalidId(String),
    #[error("Session storage error: {0}")]
    Storage(#[from] StoreError),
}
