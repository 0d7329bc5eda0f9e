use serde_json::json;

use rnsq_utils::Counter;

/// Reader counters, shared with the coordinating task.
#[derive(Debug, Default)]
pub struct Stats {
    pub in_flight: Counter,
    pub received: Counter,
    pub finished: Counter,
    pub requeued: Counter,
    pub discarded: Counter,
    pub connections: Counter,
}

impl Stats {
    #[inline]
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "in_flight": self.in_flight.to_json(),
            "received": self.received.count(),
            "finished": self.finished.count(),
            "requeued": self.requeued.count(),
            "discarded": self.discarded.count(),
            "connections": self.connections.to_json(),
        })
    }
}
