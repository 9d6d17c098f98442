use thiserror::Error;

pub type Result<T> = std::result::Result<T, LockError>;

/// Error kinds a lock backend may surface to the election engine.
///
/// The engine dispatches on the kind, never on backend detail:
/// `NotFound` signals the create path, `Conflict` a lost conditional
/// write (re-read on the next tick), `Transient` a retryable backend
/// failure.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock resource not found: {0}")]
    NotFound(String),

    #[error("conditional write rejected: {0}")]
    Conflict(String),

    #[error("backend unavailable: {0}")]
    Transient(String),

    #[error("malformed lock record: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LockError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LockError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, LockError::Conflict(_))
    }
}
