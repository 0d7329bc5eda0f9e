use rnsq_codec::error::{DecodeError, EncodeError};
use rnsq_codec::types::is_fatal_error;
use rnsq_codec::MessageId;

#[derive(Debug, thiserror::Error)]
pub enum NsqError {
    /// Handshake error
    #[error("Nsq handshake error: {0}")]
    Handshake(String),
    #[error("Nsq protocol error: {0}")]
    Protocol(String),
    /// Frame decoding error
    #[error("Decoding error: {0:?}")]
    Decode(#[from] DecodeError),
    /// Command encoding error
    #[error("Encoding error: {0:?}")]
    Encode(#[from] EncodeError),
    /// Connect timeout
    #[error("Connect timeout")]
    ConnectTimeout,
    /// Read timeout, no frame (not even a heartbeat) within two heartbeat intervals
    #[error("Read timeout")]
    ReadTimeout,
    /// Write timeout
    #[error("Write timeout")]
    WriteTimeout,
    /// Close timeout
    #[error("Close timeout")]
    CloseTimeout,
    /// Error frame sent by nsqd
    #[error("{text}")]
    Response { code: String, text: String },
    #[error("connection closed")]
    Disconnected,
    #[error("message {0} already responded")]
    AlreadyResponded(MessageId),
    /// Reader-local delivery id that is no longer tracked
    #[error("delivery {0} is not in flight")]
    UnknownMessage(u64),
    #[error("reader closed")]
    ReaderClosed,
    #[error("invalid config, {0}")]
    InvalidConfig(String),
    #[error("lookup error, {0}")]
    Lookup(String),
    #[error("{addr} unreachable after {attempts} connect attempts")]
    Unreachable { addr: String, attempts: usize },
}

impl NsqError {
    /// Whether nsqd closes the connection after this error.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        match self {
            NsqError::Response { code, .. } => is_fatal_error(code),
            NsqError::AlreadyResponded(_)
            | NsqError::UnknownMessage(_)
            | NsqError::Lookup(_)
            | NsqError::Unreachable { .. } => false,
            _ => true,
        }
    }

    #[inline]
    pub(crate) fn response(data: &[u8]) -> Self {
        NsqError::Response {
            code: rnsq_codec::types::error_code(data),
            text: String::from_utf8_lossy(data).into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_frames() {
        let err = NsqError::response(b"E_FIN_FAILED FIN 0a1b2c3d4e5f6789 failed");
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "E_FIN_FAILED FIN 0a1b2c3d4e5f6789 failed");

        let err = NsqError::response(b"E_BAD_TOPIC PUB topic name \"a b\" is not valid");
        assert!(err.is_fatal());
        assert!(NsqError::ReadTimeout.is_fatal());
    }
}
