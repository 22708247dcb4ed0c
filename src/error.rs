use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("FeOxDB error: {0}")]
    Database(#[from] feoxdb::FeoxError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Buffer overflow")]
    BufferOverflow,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Text sent to the client when this error is surfaced as an error reply.
    ///
    /// Storage failures carry the engine's own message, matching what the
    /// operator sees in the log.
    pub fn reply_text(&self) -> String {
        match self {
            Error::Database(e) => e.to_string(),
            Error::BufferOverflow => "request too large".to_string(),
            Error::Protocol(_) => "protocol error".to_string(),
            other => other.to_string(),
        }
    }
}
