use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::command::Command;
use crate::error::{DecodeError, EncodeError};
use crate::types::{Frame, FrameType, Message};

/// size(4) + frame type(4)
const FRAME_HEADER_LENGTH: usize = 8;

#[derive(Debug, Clone)]
/// NSQ V2 protocol codec
pub struct NsqCodec {
    max_size: u32,
}

impl NsqCodec {
    /// Create `NsqCodec` instance
    pub fn new(max_frame_size: u32) -> Self {
        NsqCodec { max_size: max_frame_size }
    }

    /// Set max inbound frame size.
    ///
    /// If max size is set to `0`, size is unlimited.
    pub fn set_max_size(&mut self, size: u32) {
        self.max_size = size;
    }
}

impl Default for NsqCodec {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Decoder for NsqCodec {
    type Item = Frame;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, DecodeError> {
        if src.len() < 4 {
            return Ok(None);
        }
        let size = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        // the size covers the frame type
        ensure!(size >= 4, DecodeError::MalformedFrame);
        if self.max_size != 0 && self.max_size < size {
            return Err(DecodeError::MaxSizeExceeded);
        }
        let frame_len = 4 + size as usize;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(frame_len);
        frame.advance(4);
        let frame_type = FrameType::try_from(frame.get_i32())?;
        let data = frame.freeze();
        let frame = match frame_type {
            FrameType::Response => Frame::Response(data),
            FrameType::Error => Frame::Error(data),
            FrameType::Message => Frame::Message(Message::decode(data)?),
        };
        src.reserve(FRAME_HEADER_LENGTH);
        Ok(Some(frame))
    }
}

impl Encoder<Command> for NsqCodec {
    type Error = EncodeError;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), EncodeError> {
        dst.reserve(item.encoded_size());
        item.encode(dst)
    }
}
