use thiserror::Error;

/// Errors raised while rotating proxies
#[derive(Error, Debug)]
pub enum SocksRotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("chain hop failed: {0}")]
    Chain(String),

    #[error("negotiation timed out")]
    Timeout(#[from] tokio::time::error::Elapsed),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, SocksRotError>;
