use thiserror::Error;

/// Errors surfaced to the user. The HTTP adapter maps each variant to a status code.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("upload error: {0}")]
    Upload(String),
    #[error("inference error: {0}")]
    Inference(String),
    #[error("camera error: {0}")]
    Camera(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("operation failed: {0}")]
    OperationFailed(String),
}

pub type DomainResult<T> = Result<T, DomainError>;
