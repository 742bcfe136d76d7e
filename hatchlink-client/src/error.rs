use hatchlink_api::{CodecError, DecodeError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Deadline elapsed")]
    Timeout,

    #[error("Link closed")]
    Closed,

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn storage<S: Into<String>>(message: S) -> Self {
        Self::Storage(message.into())
    }
}
