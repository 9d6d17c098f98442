use thiserror::Error;

#[derive(Debug, Error)]
pub enum ElectionError {
    #[error("invalid election config: {0}")]
    InvalidConfig(String),
}
