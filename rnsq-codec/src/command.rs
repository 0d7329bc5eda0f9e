use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use bytestring::ByteString;

use crate::error::EncodeError;
use crate::types::{MessageId, MAGIC_V2, MSG_ID_LENGTH};
use crate::utils::check_name;

/// Client command of the V2 protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Protocol magic, written once before any other command
    Magic,
    /// `IDENTIFY` with a JSON body
    Identify(Bytes),
    Subscribe { topic: ByteString, channel: ByteString },
    Ready(u32),
    Finish(MessageId),
    /// `REQ`, the timeout is a delay hint for nsqd
    Requeue { id: MessageId, timeout: Duration },
    Touch(MessageId),
    /// `CLS`, nsqd answers `CLOSE_WAIT` and stops sending messages
    Close,
    Nop,
    Publish { topic: ByteString, body: Bytes },
    MultiPublish { topic: ByteString, bodies: Vec<Bytes> },
    DeferredPublish { topic: ByteString, defer: Duration, body: Bytes },
}

impl Command {
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Command::Magic => "MAGIC",
            Command::Identify(_) => "IDENTIFY",
            Command::Subscribe { .. } => "SUB",
            Command::Ready(_) => "RDY",
            Command::Finish(_) => "FIN",
            Command::Requeue { .. } => "REQ",
            Command::Touch(_) => "TOUCH",
            Command::Close => "CLS",
            Command::Nop => "NOP",
            Command::Publish { .. } => "PUB",
            Command::MultiPublish { .. } => "MPUB",
            Command::DeferredPublish { .. } => "DPUB",
        }
    }

    /// Whether nsqd answers this command with a response (or error) frame.
    ///
    /// `CLS` is answered too, but its `CLOSE_WAIT` is recognized by content.
    #[inline]
    pub fn expects_response(&self) -> bool {
        matches!(
            self,
            Command::Identify(_)
                | Command::Subscribe { .. }
                | Command::Publish { .. }
                | Command::MultiPublish { .. }
                | Command::DeferredPublish { .. }
        )
    }

    pub(crate) fn encoded_size(&self) -> usize {
        let name = self.name().len() + 1;
        match self {
            Command::Magic => MAGIC_V2.len(),
            Command::Identify(body) => name + 4 + body.len(),
            Command::Subscribe { topic, channel } => name + topic.len() + 1 + channel.len() + 1,
            Command::Ready(_) => name + 10 + 1,
            Command::Finish(_) | Command::Touch(_) => name + MSG_ID_LENGTH + 1,
            Command::Requeue { .. } => name + MSG_ID_LENGTH + 1 + 20 + 1,
            Command::Close | Command::Nop => name,
            Command::Publish { topic, body } => name + topic.len() + 1 + 4 + body.len(),
            Command::MultiPublish { topic, bodies } => {
                name + topic.len() + 1 + 4 + 4 + bodies.iter().map(|b| 4 + b.len()).sum::<usize>()
            }
            Command::DeferredPublish { topic, body, .. } => name + topic.len() + 1 + 20 + 1 + 4 + body.len(),
        }
    }

    pub(crate) fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        match self {
            Command::Magic => {
                dst.put_slice(MAGIC_V2);
            }
            Command::Identify(body) => {
                put_line(dst, &[self.name()]);
                put_body(dst, body)?;
            }
            Command::Subscribe { topic, channel } => {
                check_name(topic)?;
                check_name(channel)?;
                put_line(dst, &[self.name(), &**topic, &**channel]);
            }
            Command::Ready(count) => {
                put_line(dst, &[self.name(), count.to_string().as_str()]);
            }
            Command::Finish(id) | Command::Touch(id) => {
                put_line(dst, &[self.name(), id.to_string().as_str()]);
            }
            Command::Requeue { id, timeout } => {
                put_line(dst, &[self.name(), id.to_string().as_str(), timeout.as_millis().to_string().as_str()]);
            }
            Command::Close | Command::Nop => {
                put_line(dst, &[self.name()]);
            }
            Command::Publish { topic, body } => {
                check_name(topic)?;
                put_line(dst, &[self.name(), &**topic]);
                put_body(dst, body)?;
            }
            Command::MultiPublish { topic, bodies } => {
                check_name(topic)?;
                ensure!(!bodies.is_empty(), EncodeError::EmptyBatch);
                put_line(dst, &[self.name(), &**topic]);
                let size = 4 + bodies.iter().map(|b| 4 + b.len()).sum::<usize>();
                dst.put_u32(u32::try_from(size).map_err(|_| EncodeError::InvalidLength)?);
                dst.put_u32(u32::try_from(bodies.len()).map_err(|_| EncodeError::InvalidLength)?);
                for body in bodies {
                    put_body(dst, body)?;
                }
            }
            Command::DeferredPublish { topic, defer, body } => {
                check_name(topic)?;
                put_line(dst, &[self.name(), &**topic, defer.as_millis().to_string().as_str()]);
                put_body(dst, body)?;
            }
        }
        Ok(())
    }
}

#[inline]
fn put_line(dst: &mut BytesMut, parts: &[&str]) {
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            dst.put_u8(b' ');
        }
        dst.put_slice(part.as_bytes());
    }
    dst.put_u8(b'\n');
}

#[inline]
fn put_body(dst: &mut BytesMut, body: &[u8]) -> Result<(), EncodeError> {
    dst.put_u32(u32::try_from(body.len()).map_err(|_| EncodeError::InvalidLength)?);
    dst.put_slice(body);
    Ok(())
}
