//! Distribution of the reader's `max_in_flight` budget over its connections.
//!
//! Every eligible (connected, not draining) connection gets `floor(max / N)` credits,
//! the remainder goes to the first connections in address order. With fewer credits
//! than connections a window of single credits rotates over the connections.
//!
//! A connection's commitment is `max(ready, in_flight)`. Lowered ready counts take
//! effect at once, raised ones only within the budget left by all commitments, so
//! neither the sum of ready counts nor the number of messages in flight exceeds
//! `max_in_flight` when a credit moves between connections.

use std::collections::BTreeMap;

use rnsq_net::ConnId;
use rnsq_utils::Addr;

/// A `RDY` update to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub addr: Addr,
    pub conn_id: ConnId,
    pub ready: u32,
}

#[derive(Debug)]
struct Slot {
    conn_id: ConnId,
    max_ready: u32,
    ready: u32,
    in_flight: u32,
    draining: bool,
}

impl Slot {
    #[inline]
    fn committed(&self) -> u32 {
        self.ready.max(self.in_flight)
    }
}

#[derive(Debug)]
pub struct FlowController {
    max_in_flight: u32,
    closing: bool,
    slots: BTreeMap<Addr, Slot>,
    cursor: usize,
}

impl FlowController {
    pub fn new(max_in_flight: u32) -> Self {
        FlowController { max_in_flight, closing: false, slots: BTreeMap::new(), cursor: 0 }
    }

    #[inline]
    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight
    }

    #[inline]
    pub fn set_max_in_flight(&mut self, max_in_flight: u32) {
        self.max_in_flight = max_in_flight;
    }

    /// Registers a connection with ready count 0.
    pub fn add(&mut self, addr: Addr, conn_id: ConnId, max_ready: u32) {
        self.slots.insert(addr, Slot { conn_id, max_ready, ready: 0, in_flight: 0, draining: false });
    }

    pub fn remove(&mut self, addr: &str) -> bool {
        self.slots.remove(addr).is_some()
    }

    /// Withdraws the connection's credits, it is removed once its messages are done.
    pub fn drain(&mut self, addr: &str) {
        if let Some(slot) = self.slots.get_mut(addr) {
            slot.draining = true;
        }
    }

    /// Makes a draining connection eligible again.
    pub fn resume(&mut self, addr: &str) {
        if let Some(slot) = self.slots.get_mut(addr) {
            slot.draining = false;
        }
    }

    /// Every ready count drops to 0 from now on.
    #[inline]
    pub fn close(&mut self) {
        self.closing = true;
    }

    #[inline]
    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Connection currently registered for `addr`
    #[inline]
    pub fn conn_id(&self, addr: &str) -> Option<ConnId> {
        self.slots.get(addr).map(|s| s.conn_id)
    }

    pub fn delivered(&mut self, addr: &str) {
        if let Some(slot) = self.slots.get_mut(addr) {
            slot.in_flight += 1;
        }
    }

    /// Returns the connection's remaining in-flight count.
    pub fn completed(&mut self, addr: &str) -> Option<u32> {
        let rotating = self.is_rotating();
        let slot = self.slots.get_mut(addr)?;
        slot.in_flight = slot.in_flight.saturating_sub(1);
        let remaining = slot.in_flight;
        if rotating && remaining == 0 && slot.ready > 0 {
            self.rotate();
        }
        Some(remaining)
    }

    #[inline]
    pub fn in_flight(&self, addr: &str) -> u32 {
        self.slots.get(addr).map(|s| s.in_flight).unwrap_or_default()
    }

    #[inline]
    pub fn ready(&self, addr: &str) -> Option<u32> {
        self.slots.get(addr).map(|s| s.ready)
    }

    #[inline]
    pub fn total_ready(&self) -> u32 {
        self.slots.values().map(|s| s.ready).sum()
    }

    #[inline]
    fn eligible(&self) -> usize {
        self.slots.values().filter(|s| !s.draining).count()
    }

    /// Fewer credits than eligible connections.
    #[inline]
    pub fn is_rotating(&self) -> bool {
        !self.closing && (self.max_in_flight as usize) < self.eligible()
    }

    /// Moves the credit window by one connection.
    pub fn rotate(&mut self) {
        let n = self.eligible();
        if self.is_rotating() && n > 0 {
            self.cursor = (self.cursor + 1) % n;
        }
    }

    fn targets(&self) -> Vec<u32> {
        let mut targets = vec![0; self.slots.len()];
        let eligible: Vec<usize> =
            self.slots.values().enumerate().filter(|(_, s)| !s.draining).map(|(i, _)| i).collect();
        let n = eligible.len();
        if self.closing || n == 0 || self.max_in_flight == 0 {
            return targets;
        }

        let max = self.max_in_flight as usize;
        if max >= n {
            // connections capped by max_ready pass their surplus on to the others
            let caps: Vec<usize> = self.slots.values().map(|s| s.max_ready as usize).collect();
            let mut open = eligible;
            let mut budget = max;
            while !open.is_empty() {
                let (base, rem) = (budget / open.len(), budget % open.len());
                let capped: Vec<usize> = open
                    .iter()
                    .enumerate()
                    .filter(|(i, idx)| caps[**idx] < base + usize::from(*i < rem))
                    .map(|(_, idx)| *idx)
                    .collect();
                if capped.is_empty() {
                    for (i, idx) in open.iter().enumerate() {
                        targets[*idx] = (base + usize::from(i < rem)) as u32;
                    }
                    break;
                }
                for idx in capped {
                    targets[idx] = caps[idx] as u32;
                    budget -= caps[idx];
                    open.retain(|i| *i != idx);
                }
            }
        } else {
            let start = self.cursor % n;
            for k in 0..max {
                targets[eligible[(start + k) % n]] = 1;
            }
        }

        for (target, slot) in targets.iter_mut().zip(self.slots.values()) {
            *target = (*target).min(slot.max_ready);
        }
        targets
    }

    /// Recomputes every ready count. Returns the changed ones, decreases first.
    pub fn recompute(&mut self) -> Vec<Assignment> {
        let targets = self.targets();
        let mut decreases = Vec::new();
        let mut increases = Vec::new();

        for ((addr, slot), target) in self.slots.iter_mut().zip(targets.iter()) {
            if *target < slot.ready {
                slot.ready = *target;
                decreases.push(Assignment { addr: addr.clone(), conn_id: slot.conn_id, ready: slot.ready });
            }
        }

        let mut committed: u32 = self.slots.values().map(Slot::committed).sum();
        for ((addr, slot), target) in self.slots.iter_mut().zip(targets.iter()) {
            if *target <= slot.ready {
                continue;
            }
            let available = self.max_in_flight.saturating_sub(committed);
            let base = slot.committed();
            let ready = (*target).min(base + available);
            if ready > slot.ready {
                committed += ready.max(slot.in_flight) - base;
                slot.ready = ready;
                increases.push(Assignment { addr: addr.clone(), conn_id: slot.conn_id, ready });
            }
        }

        decreases.extend(increases);
        decreases
    }
}
