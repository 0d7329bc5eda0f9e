use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use crate::error::DecodeError;

/// Protocol magic sent by the client right after the TCP connection is established
pub const MAGIC_V2: &[u8; 4] = b"  V2";

/// Length of a message id on the wire
pub const MSG_ID_LENGTH: usize = 16;

/// timestamp(8) + attempts(2) + id(16)
pub(crate) const MSG_HEADER_LENGTH: usize = 8 + 2 + MSG_ID_LENGTH;

pub const OK_RESPONSE: &[u8] = b"OK";
pub const HEARTBEAT_RESPONSE: &[u8] = b"_heartbeat_";
pub const CLOSE_WAIT_RESPONSE: &[u8] = b"CLOSE_WAIT";

/// Error codes after which nsqd keeps the connection open
const NON_FATAL_ERRORS: [&str; 3] = ["E_FIN_FAILED", "E_REQ_FAILED", "E_TOUCH_FAILED"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Response = 0,
    Error = 1,
    Message = 2,
}

impl TryFrom<i32> for FrameType {
    type Error = DecodeError;

    fn try_from(v: i32) -> Result<Self, DecodeError> {
        match v {
            0 => Ok(FrameType::Response),
            1 => Ok(FrameType::Error),
            2 => Ok(FrameType::Message),
            _ => Err(DecodeError::InvalidFrameType(v)),
        }
    }
}

/// Broker assigned message id, 16 ASCII bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId([u8; MSG_ID_LENGTH]);

impl MessageId {
    #[inline]
    pub fn new(id: [u8; MSG_ID_LENGTH]) -> Self {
        MessageId(id)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; MSG_ID_LENGTH] {
        &self.0
    }
}

impl TryFrom<&[u8]> for MessageId {
    type Error = DecodeError;

    fn try_from(v: &[u8]) -> Result<Self, DecodeError> {
        let id: [u8; MSG_ID_LENGTH] = v.try_into().map_err(|_| DecodeError::InvalidLength)?;
        Ok(MessageId(id))
    }
}

impl FromStr for MessageId {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageId::try_from(s.as_bytes())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({self})")
    }
}

/// A message frame as delivered by nsqd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Nanoseconds since the Unix epoch at which nsqd received the message
    pub timestamp: i64,
    /// Delivery attempt, 1 on first delivery
    pub attempts: u16,
    pub id: MessageId,
    pub body: Bytes,
}

impl Message {
    pub(crate) fn decode(mut data: Bytes) -> Result<Self, DecodeError> {
        ensure!(data.len() >= MSG_HEADER_LENGTH, DecodeError::MalformedFrame);
        let header = data.split_to(MSG_HEADER_LENGTH);
        let timestamp = i64::from_be_bytes(header[0..8].try_into().map_err(|_| DecodeError::MalformedFrame)?);
        let attempts = u16::from_be_bytes(header[8..10].try_into().map_err(|_| DecodeError::MalformedFrame)?);
        let id = MessageId::try_from(&header[10..MSG_HEADER_LENGTH])?;
        Ok(Message { timestamp, attempts, id, body: data })
    }
}

/// Decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Response(Bytes),
    Error(Bytes),
    Message(Message),
}

impl Frame {
    #[inline]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Response(_) => FrameType::Response,
            Frame::Error(_) => FrameType::Error,
            Frame::Message(_) => FrameType::Message,
        }
    }

    #[inline]
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Frame::Response(data) if data.as_ref() == HEARTBEAT_RESPONSE)
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        matches!(self, Frame::Response(data) if data.as_ref() == OK_RESPONSE)
    }

    #[inline]
    pub fn is_close_wait(&self) -> bool {
        matches!(self, Frame::Response(data) if data.as_ref() == CLOSE_WAIT_RESPONSE)
    }
}

/// Error code of an error frame, `E_INVALID` for `E_INVALID cannot SUB in current state`.
#[inline]
pub fn error_code(data: &[u8]) -> String {
    let text = String::from_utf8_lossy(data);
    text.split_whitespace().next().unwrap_or_default().to_owned()
}

#[inline]
pub fn is_fatal_error(code: &str) -> bool {
    !NON_FATAL_ERRORS.contains(&code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id() {
        let id: MessageId = "0a1b2c3d4e5f6789".parse().unwrap();
        assert_eq!(id.to_string(), "0a1b2c3d4e5f6789");
        assert!("short".parse::<MessageId>().is_err());
    }

    #[test]
    fn test_error_code() {
        assert_eq!(error_code(b"E_FIN_FAILED FIN 0a1b failed"), "E_FIN_FAILED");
        assert_eq!(error_code(b"E_INVALID"), "E_INVALID");
        assert!(!is_fatal_error("E_REQ_FAILED"));
        assert!(!is_fatal_error("E_TOUCH_FAILED"));
        assert!(is_fatal_error("E_BAD_TOPIC"));
    }
}
