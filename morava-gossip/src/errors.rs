use thiserror::Error;

pub type Result<T> = std::result::Result<T, GossipError>;

#[derive(Debug, Error)]
pub enum GossipError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("envelope codec error: {0}")]
    Envelope(#[from] bincode::Error),

    #[error("failed to join cluster: no seed reachable")]
    JoinFailed,
}

impl GossipError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GossipError::NotFound(_))
    }
}
