use thiserror::Error;

#[derive(Debug, Error)]
pub enum StyleError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("style worker failed: {0}")]
    Worker(String),
    #[error("timed out waiting for {pending} of {total} style chunks")]
    Timeout { pending: usize, total: usize },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StyleError>;
