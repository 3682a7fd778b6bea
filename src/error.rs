use thiserror::Error;

#[derive(Error, Debug)]
pub enum MsiverError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Operation aborted: {0}")]
    OperationAborted(String),

    #[error("Failed to update file version: {0}")]
    PatchFailed(Box<MsiverError>),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MsiverError>;

/// Failure of a single update statement against the file table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatementError {
    /// The store rejected this row's update; the handle is still usable.
    #[error("{0}")]
    Row(String),

    /// The store itself is unusable; the batch cannot continue.
    #[error("{0}")]
    Handle(String),
}
