use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use rnsq_codec::{Message as RawMessage, MessageId};
use rnsq_net::{NsqError, Result};

use crate::reader::Request;
use crate::tracker::DeliveryId;

/// Lifecycle of a delivered message as seen by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    /// In flight, waiting for the application
    Delivered,
    Finishing,
    /// Handed back to nsqd, which redelivers it later with the next attempt
    Requeuing,
    /// Attempts exhausted, already acknowledged by the reader
    Discarded,
}

/// A message delivered by a [`Reader`](crate::Reader).
///
/// Respond exactly once with [`finish`](Message::finish) or [`requeue`](Message::requeue),
/// [`touch`](Message::touch) may be called any number of times before that. Clones share
/// the same state. Dropping the last clone without responding requeues the message
/// with no delay.
#[derive(Clone)]
pub struct Message(Arc<Inner>);

struct Inner {
    raw: RawMessage,
    delivery: Option<DeliveryId>,
    state: Mutex<MessageState>,
    tx: mpsc::UnboundedSender<Request>,
}

impl Message {
    pub(crate) fn delivered(raw: RawMessage, delivery: DeliveryId, tx: mpsc::UnboundedSender<Request>) -> Self {
        Message(Arc::new(Inner { raw, delivery: Some(delivery), state: Mutex::new(MessageState::Delivered), tx }))
    }

    pub(crate) fn discarded(raw: RawMessage, tx: mpsc::UnboundedSender<Request>) -> Self {
        Message(Arc::new(Inner { raw, delivery: None, state: Mutex::new(MessageState::Discarded), tx }))
    }

    #[inline]
    pub fn id(&self) -> MessageId {
        self.0.raw.id
    }

    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.0.raw.body
    }

    /// Delivery attempt, 1 on first delivery
    #[inline]
    pub fn attempts(&self) -> u16 {
        self.0.raw.attempts
    }

    /// Nanoseconds since the Unix epoch at which nsqd received the message
    #[inline]
    pub fn timestamp(&self) -> i64 {
        self.0.raw.timestamp
    }

    #[inline]
    pub fn state(&self) -> MessageState {
        *self.0.state.lock()
    }

    /// Acknowledges the message.
    pub fn finish(&self) -> Result<()> {
        let delivery = self.respond(MessageState::Finishing)?;
        self.send(Request::Finish(delivery))
    }

    /// Hands the message back to nsqd, `delay` is a hint for when to redeliver it.
    pub fn requeue(&self, delay: Duration) -> Result<()> {
        let delivery = self.respond(MessageState::Requeuing)?;
        self.send(Request::Requeue(delivery, delay))
    }

    /// Resets the nsqd side timeout of the message.
    pub fn touch(&self) -> Result<()> {
        match (self.state(), self.0.delivery) {
            (MessageState::Delivered, Some(delivery)) => self.send(Request::Touch(delivery)),
            _ => Err(NsqError::AlreadyResponded(self.0.raw.id).into()),
        }
    }

    /// Marks the message as requeued without telling the reader, which completes the
    /// delivery itself.
    pub(crate) fn withdraw(&self) -> Result<DeliveryId> {
        self.respond(MessageState::Requeuing)
    }

    fn respond(&self, next: MessageState) -> Result<DeliveryId> {
        self.0.respond(next).ok_or_else(|| NsqError::AlreadyResponded(self.0.raw.id).into())
    }

    #[inline]
    fn send(&self, req: Request) -> Result<()> {
        self.0.tx.send(req).map_err(|_| NsqError::ReaderClosed)?;
        Ok(())
    }
}

impl Inner {
    fn respond(&self, next: MessageState) -> Option<DeliveryId> {
        let mut state = self.state.lock();
        match (*state, self.delivery) {
            (MessageState::Delivered, Some(delivery)) => {
                *state = next;
                Some(delivery)
            }
            _ => None,
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(delivery) = self.respond(MessageState::Requeuing) {
            log::debug!("message {} dropped unanswered, requeue", self.raw.id);
            let _ = self.tx.send(Request::Requeue(delivery, Duration::ZERO));
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.0.raw.id)
            .field("attempts", &self.0.raw.attempts)
            .field("len", &self.0.raw.body.len())
            .field("state", &self.state())
            .finish()
    }
}
