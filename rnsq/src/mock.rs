//! In-memory nsqd and nsqlookupd for reader tests.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use rnsq_codec::{Message as RawMessage, MessageId};
use rnsq_net::{ConnId, Connection, Connector, Event, EventTx, NsqError, Result};
use rnsq_utils::Addr;

use crate::discovery::Lookup;

type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

struct Session {
    id: ConnId,
    events: EventTx,
    subscribed: bool,
}

#[derive(Default)]
struct Nsqd {
    queue: VecDeque<RawMessage>,
    in_flight: Vec<RawMessage>,
    session: Option<Session>,
    ready: u32,
    next_id: u64,
    down: bool,
    connects: usize,
    delivered: usize,
    rdy_history: Vec<u32>,
    finished: Vec<MessageId>,
    requeued: Vec<(MessageId, Duration)>,
    touched: Vec<MessageId>,
}

impl Nsqd {
    fn next_id(&mut self) -> MessageId {
        self.next_id += 1;
        MessageId::try_from(format!("{:016x}", self.next_id).as_bytes()).unwrap()
    }

    fn send(&self, ev: Event) {
        if let Some(s) = self.session.as_ref() {
            let _ = s.events.send((s.id, ev));
        }
    }

    fn deliver(&mut self, mut msg: RawMessage) {
        msg.attempts += 1;
        self.in_flight.push(msg.clone());
        self.delivered += 1;
        self.send(Event::Message(msg));
    }

    /// Delivers queued messages up to the ready count.
    fn pump(&mut self) {
        if !self.session.as_ref().is_some_and(|s| s.subscribed) {
            return;
        }
        while (self.in_flight.len() as u32) < self.ready {
            let Some(msg) = self.queue.pop_front() else { break };
            self.deliver(msg);
        }
    }

    fn take(&mut self, id: MessageId) -> Option<RawMessage> {
        let pos = self.in_flight.iter().position(|m| m.id == id)?;
        Some(self.in_flight.remove(pos))
    }

    fn disconnect(&mut self) {
        self.send(Event::Closed);
        self.session = None;
        self.ready = 0;
        for msg in self.in_flight.drain(..).rev() {
            self.queue.push_front(msg);
        }
    }

    fn check(&self, id: ConnId) -> Result<()> {
        match self.session.as_ref() {
            Some(s) if s.id == id => Ok(()),
            _ => Err(NsqError::Disconnected.into()),
        }
    }
}

/// One fake nsqd node with a single topic/channel.
#[derive(Clone, Default)]
pub struct MockNsqd {
    inner: Arc<Mutex<Nsqd>>,
}

impl MockNsqd {
    pub fn publish<B: Into<Bytes>>(&self, body: B) -> MessageId {
        let mut nsqd = self.inner.lock();
        let id = nsqd.next_id();
        nsqd.queue.push_back(RawMessage { timestamp: 0, attempts: 0, id, body: body.into() });
        nsqd.pump();
        id
    }

    /// Delivers a message regardless of the ready count, like one already on the wire.
    pub fn push_unsolicited<B: Into<Bytes>>(&self, body: B) -> MessageId {
        let mut nsqd = self.inner.lock();
        let id = nsqd.next_id();
        nsqd.deliver(RawMessage { timestamp: 0, attempts: 0, id, body: body.into() });
        id
    }

    /// Sends an error frame and drops the connection.
    pub fn fail(&self, text: &str) {
        let mut nsqd = self.inner.lock();
        let code = text.split(' ').next().unwrap_or_default().to_owned();
        nsqd.send(Event::Error(NsqError::Response { code, text: text.to_owned() }.into()));
        nsqd.disconnect();
    }

    /// Refuses new connections.
    pub fn set_down(&self, down: bool) {
        self.inner.lock().down = down;
    }

    pub fn ready(&self) -> u32 {
        self.inner.lock().ready
    }

    pub fn rdy_history(&self) -> Vec<u32> {
        self.inner.lock().rdy_history.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().session.is_some()
    }

    /// Connection attempts, refused ones included
    pub fn connects(&self) -> usize {
        self.inner.lock().connects
    }

    pub fn delivered(&self) -> usize {
        self.inner.lock().delivered
    }

    pub fn finished(&self) -> usize {
        self.inner.lock().finished.len()
    }

    pub fn requeued(&self) -> Vec<(MessageId, Duration)> {
        self.inner.lock().requeued.clone()
    }

    pub fn touched(&self) -> usize {
        self.inner.lock().touched.len()
    }

    fn accept(&self, id: ConnId, events: EventTx) -> Result<()> {
        let mut nsqd = self.inner.lock();
        nsqd.connects += 1;
        if nsqd.down {
            return Err(anyhow::anyhow!("connection refused"));
        }
        if nsqd.session.is_some() {
            nsqd.disconnect();
        }
        nsqd.session = Some(Session { id, events, subscribed: false });
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MockConnector {
    nsqds: Arc<Mutex<HashMap<String, MockNsqd>>>,
}

impl MockConnector {
    pub fn add(&self, addr: &str) -> MockNsqd {
        self.nsqds.lock().entry(addr.to_owned()).or_default().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, id: ConnId, addr: &str, events: EventTx) -> Result<Box<dyn Connection>> {
        let nsqd =
            self.nsqds.lock().get(addr).cloned().ok_or_else(|| anyhow::anyhow!("{} connection refused", addr))?;
        nsqd.accept(id, events)?;
        Ok(Box::new(MockConnection { id, addr: addr.to_owned(), nsqd }))
    }
}

struct MockConnection {
    id: ConnId,
    addr: String,
    nsqd: MockNsqd,
}

impl Connection for MockConnection {
    fn id(&self) -> ConnId {
        self.id
    }

    fn addr(&self) -> &str {
        &self.addr
    }

    fn max_ready(&self) -> u32 {
        2500
    }

    fn subscribe(&self, _topic: &str, _channel: &str) -> Result<()> {
        let mut nsqd = self.nsqd.inner.lock();
        nsqd.check(self.id)?;
        if let Some(s) = nsqd.session.as_mut() {
            s.subscribed = true;
        }
        nsqd.send(Event::Ready);
        nsqd.pump();
        Ok(())
    }

    fn set_ready(&self, count: u32) -> Result<()> {
        let mut nsqd = self.nsqd.inner.lock();
        nsqd.check(self.id)?;
        nsqd.ready = count;
        nsqd.rdy_history.push(count);
        nsqd.pump();
        Ok(())
    }

    fn finish(&self, id: MessageId) -> Result<()> {
        let mut nsqd = self.nsqd.inner.lock();
        nsqd.check(self.id)?;
        if nsqd.take(id).is_some() {
            nsqd.finished.push(id);
        }
        nsqd.pump();
        Ok(())
    }

    fn requeue(&self, id: MessageId, delay: Duration) -> Result<()> {
        let mut nsqd = self.nsqd.inner.lock();
        nsqd.check(self.id)?;
        if let Some(msg) = nsqd.take(id) {
            nsqd.requeued.push((id, delay));
            nsqd.queue.push_back(msg);
        }
        nsqd.pump();
        Ok(())
    }

    fn touch(&self, id: MessageId) -> Result<()> {
        let mut nsqd = self.nsqd.inner.lock();
        nsqd.check(self.id)?;
        nsqd.touched.push(id);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut nsqd = self.nsqd.inner.lock();
        nsqd.check(self.id)?;
        nsqd.disconnect();
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MockLookup {
    addrs: Arc<Mutex<(BTreeSet<Addr>, bool)>>,
    calls: Arc<AtomicUsize>,
}

impl MockLookup {
    pub fn new(addrs: BTreeSet<Addr>) -> Self {
        MockLookup { addrs: Arc::new(Mutex::new((addrs, false))), calls: Arc::default() }
    }

    pub fn set(&self, addrs: BTreeSet<Addr>) {
        self.addrs.lock().0 = addrs;
    }

    pub fn fail(&self, fail: bool) {
        self.addrs.lock().1 = fail;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Lookup for MockLookup {
    async fn lookup(&self, _topic: &str) -> Result<BTreeSet<Addr>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let inner = self.addrs.lock();
        if inner.1 {
            return Err(NsqError::Lookup("nsqlookupd unavailable".into()).into());
        }
        Ok(inner.0.clone())
    }
}
