//! Topic/channel consumer spread over any number of nsqd nodes.
//!
//! A [`Reader`] is a handle to a single coordinating task. The task owns every
//! connection, the [`FlowController`] and the [`MessageTracker`]; message handles,
//! the lookup task, reconnect timers and the connections themselves only talk to it
//! through channels.
//!
//! Closing is a drain: ready counts drop to 0, late arrivals are requeued, and the
//! reader only reaches [`ReaderState::Closed`] once every delivered message was
//! finished or requeued.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use parking_lot::RwLock;
use tokio::sync::mpsc::error::SendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use rnsq_codec::Message as RawMessage;
use rnsq_conf::{ReaderConfig, Settings};
use rnsq_net::{Builder, ConnId, Connection, Connector, Error, Event, EventRx, EventTx, NsqError, Result, TcpConnector};
use rnsq_utils::Addr;

use crate::discovery::{reconcile, HttpLookup, Lookup, PollTimer};
use crate::flow::FlowController;
use crate::message::Message;
use crate::stats::Stats;
use crate::tracker::{Arrival, DeliveryId, MessageTracker};

type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;
type HashSet<K> = std::collections::HashSet<K, ahash::RandomState>;

pub(crate) type Callback = Box<dyn FnOnce() + Send>;

pub(crate) enum Request {
    Finish(DeliveryId),
    Requeue(DeliveryId, Duration),
    Touch(DeliveryId),
    Discovered(BTreeSet<Addr>),
    Connected { addr: Addr, id: ConnId, result: Result<Box<dyn Connection>> },
    Reconnect(Addr),
    SetMaxInFlight(u32),
    Close(Callback),
}

#[derive(Debug)]
pub enum ReaderEvent {
    /// First subscription acknowledged, emitted once
    Ready,
    Message(Message),
    /// Delivered more than `max_attempts` times, already finished by the reader
    Discard(Message),
    Error(Error),
    /// Last event of a reader
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Connecting,
    Ready,
    /// Waiting for the messages in flight
    Closing,
    Closed,
}

/// Consumer of one topic/channel.
///
/// Must be created inside a tokio runtime. Dropping it starts the same drain as
/// [`close`](Reader::close).
pub struct Reader {
    cfg: Arc<ReaderConfig>,
    tx: mpsc::UnboundedSender<Request>,
    events: mpsc::UnboundedReceiver<ReaderEvent>,
    timer: Option<PollTimer>,
    state: Arc<RwLock<ReaderState>>,
    stats: Arc<Stats>,
}

impl Reader {
    pub fn new(cfg: ReaderConfig, builder: Builder) -> Result<Reader> {
        cfg.validate()?;
        let lookup = HttpLookup::new(cfg.nsqlookupd.clone(), cfg.lookup_timeout)?;
        Self::with(cfg, Arc::new(TcpConnector::new(builder)), Arc::new(lookup))
    }

    pub fn from_settings(settings: &Settings) -> Result<Reader> {
        Self::new(settings.reader.clone(), settings.connection.to_builder())
    }

    /// Creates a reader on top of custom connection and lookup implementations.
    pub fn with(cfg: ReaderConfig, connector: Arc<dyn Connector>, lookup: Arc<dyn Lookup>) -> Result<Reader> {
        cfg.validate()?;
        let cfg = Arc::new(cfg);
        let (tx, rx) = mpsc::unbounded_channel();
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(ReaderState::Connecting));
        let stats = Arc::new(Stats::default());

        let timer = if cfg.is_dynamic() {
            let tx = tx.clone();
            Some(PollTimer::spawn(cfg.topic.clone(), lookup, cfg.poll_interval, move |addrs| {
                tx.send(Request::Discovered(addrs)).is_ok()
            }))
        } else {
            None
        };

        log::info!(
            "reader of {}/{} starting, max_in_flight: {}, {}",
            cfg.topic,
            cfg.channel,
            cfg.max_in_flight,
            if cfg.is_dynamic() { "dynamic" } else { "static" }
        );

        let coordinator = Coordinator {
            cfg: cfg.clone(),
            connector,
            tx: tx.clone(),
            conn_tx,
            events: ev_tx,
            state: state.clone(),
            stats: stats.clone(),
            flow: FlowController::new(cfg.max_in_flight),
            tracker: MessageTracker::new(cfg.max_attempts),
            conns: HashMap::default(),
            endpoints: BTreeMap::new(),
            statics: cfg.nsqd.iter().cloned().collect(),
            closed_early: HashSet::default(),
            next_conn_id: 0,
            callbacks: Vec::new(),
        };
        tokio::spawn(coordinator.run(rx, conn_rx));

        Ok(Reader { cfg, tx, events: ev_rx, timer, state, stats })
    }

    /// Next event, `None` after [`ReaderEvent::Close`].
    #[inline]
    pub async fn recv(&mut self) -> Option<ReaderEvent> {
        self.events.recv().await
    }

    /// Starts the drain. The returned future resolves once the reader is closed,
    /// awaiting it is optional.
    pub fn close(&self) -> Closing {
        let (tx, rx) = oneshot::channel();
        self.close_with(move || {
            let _ = tx.send(());
        });
        Closing(rx)
    }

    /// Starts the drain, `f` runs exactly once when the reader is closed. On a closed
    /// reader `f` runs right away.
    pub fn close_with<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(timer) = self.timer.as_ref() {
            timer.cancel();
        }
        if let Err(SendError(Request::Close(f))) = self.tx.send(Request::Close(Box::new(f))) {
            f();
        }
    }

    /// Lookup task, only present with nsqlookupd addresses.
    #[inline]
    pub fn timer(&self) -> Option<&PollTimer> {
        self.timer.as_ref()
    }

    #[inline]
    pub fn state(&self) -> ReaderState {
        *self.state.read()
    }

    #[inline]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    #[inline]
    pub fn config(&self) -> &ReaderConfig {
        &self.cfg
    }

    /// Changes the budget at runtime, ready counts are redistributed at once.
    pub fn set_max_in_flight(&self, max_in_flight: u32) -> Result<()> {
        if max_in_flight == 0 {
            return Err(NsqError::InvalidConfig("max_in_flight must be at least 1".into()).into());
        }
        self.tx.send(Request::SetMaxInFlight(max_in_flight)).map_err(|_| NsqError::ReaderClosed)?;
        Ok(())
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.as_ref() {
            timer.cancel();
        }
        if self.state() != ReaderState::Closed {
            let _ = self.tx.send(Request::Close(Box::new(|| {})));
        }
    }
}

/// Resolves once the reader is closed.
#[must_use = "the drain runs either way, await it to wait for the reader to close"]
pub struct Closing(oneshot::Receiver<()>);

impl Future for Closing {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        Pin::new(&mut self.0).poll(cx).map(|_| ())
    }
}

enum Status {
    Connecting(ConnId),
    Connected(ConnId),
    Backoff(JoinHandle<()>),
}

struct Endpoint {
    status: Status,
    backoff: ExponentialBackoff,
    attempts: usize,
    /// Gone from the lookup results, dropped once its messages are done
    removed: bool,
}

struct Conn {
    addr: Addr,
    inner: Box<dyn Connection>,
}

struct Coordinator {
    cfg: Arc<ReaderConfig>,
    connector: Arc<dyn Connector>,
    tx: mpsc::UnboundedSender<Request>,
    conn_tx: EventTx,
    events: mpsc::UnboundedSender<ReaderEvent>,
    state: Arc<RwLock<ReaderState>>,
    stats: Arc<Stats>,
    flow: FlowController,
    tracker: MessageTracker,
    conns: HashMap<ConnId, Conn>,
    endpoints: BTreeMap<Addr, Endpoint>,
    statics: BTreeSet<Addr>,
    /// Connections that went away before their `Connected` request was handled
    closed_early: HashSet<ConnId>,
    next_conn_id: ConnId,
    callbacks: Vec<Callback>,
}

impl Coordinator {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Request>, mut conn_rx: EventRx) {
        for addr in self.statics.clone() {
            self.add_endpoint(addr);
        }

        let period = self.cfg.low_rdy_idle_timeout;
        let mut rotation = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        rotation.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(req) = rx.recv() => self.handle_request(req),
                Some((id, ev)) = conn_rx.recv() => self.handle_event(id, ev),
                _ = rotation.tick() => {
                    if self.flow.is_rotating() {
                        self.flow.rotate();
                        self.apply();
                    }
                }
            }
            if self.state() == ReaderState::Closed {
                break;
            }
        }

        rx.close();
        while let Ok(req) = rx.try_recv() {
            if let Request::Close(f) = req {
                f();
            }
        }
        log::info!("reader of {}/{} closed", self.cfg.topic, self.cfg.channel);
    }

    #[inline]
    fn state(&self) -> ReaderState {
        *self.state.read()
    }

    #[inline]
    fn set_state(&self, state: ReaderState) {
        *self.state.write() = state;
    }

    #[inline]
    fn emit(&self, ev: ReaderEvent) {
        if let Err(e) = self.events.send(ev) {
            log::trace!("reader event dropped, {:?}", e.0);
        }
    }

    fn handle_request(&mut self, req: Request) {
        match req {
            Request::Finish(delivery) => self.complete(delivery, None),
            Request::Requeue(delivery, delay) => self.complete(delivery, Some(delay)),
            Request::Touch(delivery) => self.touch(delivery),
            Request::Discovered(live) => self.discovered(live),
            Request::Connected { addr, id, result } => self.connected(addr, id, result),
            Request::Reconnect(addr) => self.reconnect(addr),
            Request::SetMaxInFlight(max_in_flight) => {
                log::debug!("max_in_flight {} -> {}", self.flow.max_in_flight(), max_in_flight);
                self.flow.set_max_in_flight(max_in_flight);
                self.apply();
            }
            Request::Close(f) => self.close(f),
        }
    }

    fn handle_event(&mut self, id: ConnId, ev: Event) {
        match ev {
            Event::Ready => {
                if self.state() == ReaderState::Connecting {
                    self.set_state(ReaderState::Ready);
                    self.emit(ReaderEvent::Ready);
                }
            }
            Event::Message(raw) => self.arrive(id, raw),
            Event::Error(e) => {
                log::warn!("connection {} error, {}", id, e);
                self.emit(ReaderEvent::Error(e));
            }
            Event::Closed => self.connection_closed(id),
        }
    }

    fn add_endpoint(&mut self, addr: Addr) {
        if let Some(ep) = self.endpoints.get_mut(&addr) {
            if ep.removed {
                log::debug!("{} is back", addr);
                ep.removed = false;
                self.flow.resume(&addr);
            }
            return;
        }
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.cfg.reconnect_interval)
            .with_max_interval(self.cfg.reconnect_max_interval)
            .with_multiplier(2.0)
            .with_max_elapsed_time(None)
            .build();
        self.endpoints
            .insert(addr.clone(), Endpoint { status: Status::Connecting(0), backoff, attempts: 0, removed: false });
        self.connect(addr);
    }

    fn connect(&mut self, addr: Addr) {
        self.next_conn_id += 1;
        let id = self.next_conn_id;
        let Some(ep) = self.endpoints.get_mut(&addr) else { return };
        ep.status = Status::Connecting(id);

        log::debug!("connecting to {}, connection {}", addr, id);
        let connector = self.connector.clone();
        let conn_tx = self.conn_tx.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = connector.connect(id, &addr, conn_tx).await;
            let _ = tx.send(Request::Connected { addr, id, result });
        });
    }

    fn connected(&mut self, addr: Addr, id: ConnId, result: Result<Box<dyn Connection>>) {
        let (current, removed) = match self.endpoints.get(&addr) {
            Some(Endpoint { status: Status::Connecting(cid), removed, .. }) => (*cid == id, *removed),
            _ => (false, false),
        };
        let closed_early = self.closed_early.remove(&id);

        let conn = match result {
            Ok(conn) => conn,
            Err(e) => {
                if current {
                    log::warn!("connect to {} failed, {}", addr, e);
                    self.emit(ReaderEvent::Error(e));
                    self.retry(addr);
                }
                return;
            }
        };

        if !current || removed || self.flow.is_closing() {
            log::debug!("connection {} to {} is no longer wanted", id, addr);
            if let Err(e) = conn.close() {
                log::debug!("close connection {}, {}", id, e);
            }
            if current {
                self.endpoints.remove(&addr);
            }
            return;
        }

        if closed_early {
            self.retry(addr);
            return;
        }

        if let Err(e) = conn.subscribe(&self.cfg.topic, &self.cfg.channel) {
            log::warn!("subscribe on {} failed, {}", addr, e);
            self.emit(ReaderEvent::Error(e));
            self.retry(addr);
            return;
        }

        log::info!("connected to {}, connection {}, max_rdy_count {}", addr, id, conn.max_ready());
        if let Some(ep) = self.endpoints.get_mut(&addr) {
            ep.status = Status::Connected(id);
            ep.attempts = 0;
            ep.backoff.reset();
        }
        self.flow.add(addr.clone(), id, conn.max_ready());
        self.conns.insert(id, Conn { addr, inner: conn });
        self.stats.connections.inc();
        self.apply();
    }

    /// Schedules the next connect to `addr`. A lookup address is given up after
    /// `max_reconnect_attempts`, a static one is then retried every `reconnect_max_interval`.
    fn retry(&mut self, addr: Addr) {
        let closing = self.flow.is_closing();
        let max = self.cfg.max_reconnect_attempts;
        let fallback = self.cfg.reconnect_max_interval;
        let Some(ep) = self.endpoints.get_mut(&addr) else { return };

        if closing || ep.removed {
            self.endpoints.remove(&addr);
            return;
        }
        ep.attempts += 1;
        let exhausted = max > 0 && ep.attempts > max;
        if exhausted && ep.attempts == max + 1 {
            let e = NsqError::Unreachable { addr: addr.to_string(), attempts: ep.attempts };
            log::warn!("{}", e);
            let _ = self.events.send(ReaderEvent::Error(e.into()));
        }
        if exhausted && !self.statics.contains(&addr) {
            self.endpoints.remove(&addr);
            return;
        }

        let delay = if exhausted { fallback } else { ep.backoff.next_backoff().unwrap_or(fallback) };
        log::info!("reconnecting to {} in {:?}, attempt {}", addr, delay, ep.attempts);
        let tx = self.tx.clone();
        ep.status = Status::Backoff(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Request::Reconnect(addr));
        }));
    }

    fn reconnect(&mut self, addr: Addr) {
        if self.flow.is_closing() {
            return;
        }
        if matches!(self.endpoints.get(&addr), Some(Endpoint { status: Status::Backoff(_), .. })) {
            self.connect(addr);
        }
    }

    fn connection_closed(&mut self, id: ConnId) {
        let Some(conn) = self.conns.remove(&id) else {
            let connecting =
                self.endpoints.values().any(|ep| matches!(ep.status, Status::Connecting(cid) if cid == id));
            if connecting {
                self.closed_early.insert(id);
            }
            return;
        };

        log::info!("connection {} to {} closed", id, conn.addr);
        self.stats.connections.dec();
        if self.flow.conn_id(&conn.addr) == Some(id) {
            self.flow.remove(&conn.addr);
        }
        let current = matches!(
            self.endpoints.get(&conn.addr),
            Some(Endpoint { status: Status::Connected(cid), .. }) if *cid == id
        );
        if current {
            self.retry(conn.addr);
        }
        self.apply();
        self.check_closed();
    }

    fn arrive(&mut self, id: ConnId, raw: RawMessage) {
        let Some(conn) = self.conns.get(&id) else {
            log::debug!("message {} from unknown connection {}", raw.id, id);
            return;
        };

        if self.flow.is_closing() {
            log::debug!("closing, requeue message {} from {}", raw.id, conn.addr);
            if let Err(e) = conn.inner.requeue(raw.id, Duration::ZERO) {
                log::debug!("requeue {} on {}, {}", raw.id, conn.addr, e);
            }
            return;
        }

        let addr = conn.addr.clone();
        match self.tracker.arrive(id, &addr, &raw) {
            Arrival::Discard => {
                log::warn!("discarding message {} from {} after {} attempts", raw.id, addr, raw.attempts);
                if let Err(e) = conn.inner.finish(raw.id) {
                    log::debug!("finish {} on {}, {}", raw.id, addr, e);
                }
                self.stats.discarded.inc();
                self.emit(ReaderEvent::Discard(Message::discarded(raw, self.tx.clone())));
            }
            Arrival::Deliver(delivery) => {
                self.flow.delivered(&addr);
                self.stats.received.inc();
                self.stats.in_flight.inc();
                let msg = Message::delivered(raw, delivery, self.tx.clone());
                if let Err(SendError(ReaderEvent::Message(msg))) = self.events.send(ReaderEvent::Message(msg)) {
                    log::debug!("no receiver for message {}, requeue", msg.id());
                    if msg.withdraw().is_ok() {
                        self.complete(delivery, Some(Duration::ZERO));
                    }
                }
            }
        }
    }

    fn complete(&mut self, delivery: DeliveryId, requeue: Option<Duration>) {
        let inflight = match self.tracker.complete(delivery) {
            Ok(inflight) => inflight,
            Err(e) => {
                log::warn!("{}", e);
                return;
            }
        };
        self.stats.in_flight.dec();
        match requeue {
            Some(_) => self.stats.requeued.inc(),
            None => self.stats.finished.inc(),
        }

        match self.conns.get(&inflight.conn_id) {
            Some(conn) => {
                let res = match requeue {
                    Some(delay) => conn.inner.requeue(inflight.msg_id, delay),
                    None => conn.inner.finish(inflight.msg_id),
                };
                if let Err(e) = res {
                    log::debug!("respond to {} on {}, {}", inflight.msg_id, inflight.addr, e);
                }
            }
            None => log::debug!(
                "connection {} is gone, nsqd redelivers message {}",
                inflight.conn_id,
                inflight.msg_id
            ),
        }

        if self.flow.conn_id(&inflight.addr) == Some(inflight.conn_id) {
            let remaining = self.flow.completed(&inflight.addr);
            let removed = self.endpoints.get(&inflight.addr).is_some_and(|ep| ep.removed);
            if remaining == Some(0) && removed {
                self.close_conn(inflight.conn_id);
            }
        }

        self.apply();
        self.check_closed();
    }

    fn touch(&mut self, delivery: DeliveryId) {
        let inflight = match self.tracker.get(delivery) {
            Ok(inflight) => inflight,
            Err(e) => {
                log::debug!("touch, {}", e);
                return;
            }
        };
        if let Some(conn) = self.conns.get(&inflight.conn_id) {
            if let Err(e) = conn.inner.touch(inflight.msg_id) {
                log::debug!("touch {} on {}, {}", inflight.msg_id, inflight.addr, e);
            }
        }
    }

    fn discovered(&mut self, live: BTreeSet<Addr>) {
        if self.flow.is_closing() {
            return;
        }
        let current: BTreeSet<Addr> =
            self.endpoints.iter().filter(|(_, ep)| !ep.removed).map(|(addr, _)| addr.clone()).collect();
        let (added, removed) = reconcile(&live, &current, &self.statics);
        for addr in added {
            log::info!("discovered {}", addr);
            self.add_endpoint(addr);
        }
        for addr in removed {
            log::info!("{} left the lookup results", addr);
            self.remove_endpoint(addr);
        }
        self.apply();
    }

    fn remove_endpoint(&mut self, addr: Addr) {
        let Some(ep) = self.endpoints.get_mut(&addr) else { return };
        let conn_id = match &ep.status {
            Status::Backoff(handle) => {
                handle.abort();
                self.endpoints.remove(&addr);
                return;
            }
            Status::Connecting(_) => {
                ep.removed = true;
                return;
            }
            Status::Connected(id) => *id,
        };
        ep.removed = true;
        self.flow.drain(&addr);
        if self.flow.in_flight(&addr) == 0 {
            self.close_conn(conn_id);
        }
    }

    fn close_conn(&self, id: ConnId) {
        if let Some(conn) = self.conns.get(&id) {
            log::debug!("closing connection {} to {}", id, conn.addr);
            if let Err(e) = conn.inner.close() {
                log::debug!("close connection {}, {}", id, e);
            }
        }
    }

    fn close(&mut self, f: Callback) {
        self.callbacks.push(f);
        if self.flow.is_closing() {
            return;
        }
        log::info!(
            "closing reader of {}/{}, {} message(s) in flight",
            self.cfg.topic,
            self.cfg.channel,
            self.tracker.len()
        );
        self.set_state(ReaderState::Closing);
        self.flow.close();
        self.apply();
        self.endpoints.retain(|_, ep| match &ep.status {
            Status::Backoff(handle) => {
                handle.abort();
                false
            }
            _ => true,
        });
        self.check_closed();
    }

    fn check_closed(&mut self) {
        if self.state() != ReaderState::Closing || !self.tracker.is_empty() {
            return;
        }
        for id in self.conns.keys().copied().collect::<Vec<_>>() {
            self.close_conn(id);
        }
        self.set_state(ReaderState::Closed);
        for f in self.callbacks.drain(..) {
            f();
        }
        self.emit(ReaderEvent::Close);
    }

    /// Sends the flow controller's ready count changes.
    fn apply(&mut self) {
        let mut failed = Vec::new();
        for a in self.flow.recompute() {
            let Some(conn) = self.conns.get(&a.conn_id) else { continue };
            log::debug!("RDY {} on {}", a.ready, a.addr);
            if let Err(e) = conn.inner.set_ready(a.ready) {
                log::debug!("RDY on {}, {}", a.addr, e);
                failed.push(a.conn_id);
            }
        }
        for id in failed {
            self.connection_closed(id);
        }
    }
}
