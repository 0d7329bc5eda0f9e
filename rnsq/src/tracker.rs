use rnsq_codec::{Message as RawMessage, MessageId};
use rnsq_net::{ConnId, NsqError, Result};
use rnsq_utils::Addr;

type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

/// Reader-local handle of one delivery, unique for the reader's lifetime
pub type DeliveryId = u64;

#[derive(Debug, Clone)]
pub struct InFlight {
    pub conn_id: ConnId,
    pub addr: Addr,
    pub msg_id: MessageId,
    pub attempts: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// Tracked, hand it to the application
    Deliver(DeliveryId),
    /// Attempts exhausted, acknowledge it to nsqd and emit a discard
    Discard,
}

/// The in-flight set of a reader.
#[derive(Debug, Default)]
pub struct MessageTracker {
    max_attempts: u16,
    next_id: DeliveryId,
    in_flight: HashMap<DeliveryId, InFlight>,
}

impl MessageTracker {
    /// `max_attempts` 0 never discards.
    pub fn new(max_attempts: u16) -> Self {
        MessageTracker { max_attempts, next_id: 0, in_flight: HashMap::default() }
    }

    pub fn arrive(&mut self, conn_id: ConnId, addr: &Addr, msg: &RawMessage) -> Arrival {
        if self.max_attempts > 0 && msg.attempts > self.max_attempts {
            return Arrival::Discard;
        }
        self.next_id += 1;
        let id = self.next_id;
        self.in_flight
            .insert(id, InFlight { conn_id, addr: addr.clone(), msg_id: msg.id, attempts: msg.attempts });
        Arrival::Deliver(id)
    }

    /// Removes a delivery that was finished or requeued.
    pub fn complete(&mut self, id: DeliveryId) -> Result<InFlight> {
        self.in_flight.remove(&id).ok_or_else(|| NsqError::UnknownMessage(id).into())
    }

    pub fn get(&self, id: DeliveryId) -> Result<&InFlight> {
        self.in_flight.get(&id).ok_or_else(|| NsqError::UnknownMessage(id).into())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn raw(attempts: u16) -> RawMessage {
        RawMessage {
            timestamp: 0,
            attempts,
            id: "0000000000000001".parse().unwrap(),
            body: Bytes::from_static(b"body"),
        }
    }

    #[test]
    fn test_discard_after_max_attempts() {
        let addr = Addr::from_static("127.0.0.1:4150");
        let mut tracker = MessageTracker::new(5);
        for attempts in 1..=5 {
            assert!(matches!(tracker.arrive(1, &addr, &raw(attempts)), Arrival::Deliver(_)));
        }
        assert_eq!(tracker.arrive(1, &addr, &raw(6)), Arrival::Discard);
        assert_eq!(tracker.len(), 5);
    }

    #[test]
    fn test_unlimited_attempts() {
        let addr = Addr::from_static("127.0.0.1:4150");
        let mut tracker = MessageTracker::new(0);
        assert!(matches!(tracker.arrive(1, &addr, &raw(u16::MAX)), Arrival::Deliver(_)));
    }

    #[test]
    fn test_complete_once() {
        let addr = Addr::from_static("127.0.0.1:4150");
        let mut tracker = MessageTracker::new(0);
        let Arrival::Deliver(id) = tracker.arrive(3, &addr, &raw(1)) else { panic!() };
        assert_eq!(tracker.get(id).unwrap().conn_id, 3);

        let inflight = tracker.complete(id).unwrap();
        assert_eq!(inflight.attempts, 1);
        assert!(tracker.is_empty());
        assert!(tracker.complete(id).is_err());
        assert!(tracker.get(id).is_err());
    }
}
