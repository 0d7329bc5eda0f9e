use std::io;

/// Errors raised while decoding frames sent by nsqd.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Invalid frame type: {0}")]
    InvalidFrameType(i32),
    #[error("Invalid length")]
    InvalidLength,
    #[error("Malformed frame")]
    MalformedFrame,
    #[error("Max size exceeded")]
    MaxSizeExceeded,
    #[error("io error, {:?}", _0)]
    Io(io::Error),
}

impl From<io::Error> for DecodeError {
    fn from(e: io::Error) -> DecodeError {
        DecodeError::Io(e)
    }
}

/// Errors raised while encoding client commands.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Invalid topic or channel name: {0:?}")]
    InvalidName(String),
    #[error("Empty message batch")]
    EmptyBatch,
    #[error("Invalid length")]
    InvalidLength,
    #[error("io error, {:?}", _0)]
    Io(io::Error),
}

impl From<io::Error> for EncodeError {
    fn from(e: io::Error) -> EncodeError {
        EncodeError::Io(e)
    }
}
