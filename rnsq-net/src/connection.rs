use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use bytestring::ByteString;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

use rnsq_codec::{Command, Frame, Message, MessageId};

use crate::error::NsqError;
use crate::stream::NsqStream;
use crate::{Builder, Error, Result};

pub type ConnId = u64;

/// Notification pushed by a connection's I/O task.
#[derive(Debug)]
pub enum Event {
    /// `SUB` acknowledged, messages may now be delivered
    Ready,
    Message(Message),
    /// Non-fatal errors leave the connection open, fatal ones are followed by `Closed`
    Error(Error),
    /// Socket ended, emitted exactly once
    Closed,
}

pub type EventTx = mpsc::UnboundedSender<(ConnId, Event)>;
pub type EventRx = mpsc::UnboundedReceiver<(ConnId, Event)>;

/// Opens connections to nsqd.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connects and completes the handshake. Events are tagged with `id`.
    async fn connect(&self, id: ConnId, addr: &str, events: EventTx) -> Result<Box<dyn Connection>>;
}

/// Handle to a live nsqd connection. All commands are queued to the connection's
/// I/O task without waiting.
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnId;

    fn addr(&self) -> &str;

    /// Upper bound for `RDY` negotiated at handshake
    fn max_ready(&self) -> u32;

    fn subscribe(&self, topic: &str, channel: &str) -> Result<()>;

    fn set_ready(&self, count: u32) -> Result<()>;

    fn finish(&self, id: MessageId) -> Result<()>;

    fn requeue(&self, id: MessageId, delay: Duration) -> Result<()>;

    fn touch(&self, id: MessageId) -> Result<()>;

    /// Sends `CLS`, the socket is shut once nsqd answers `CLOSE_WAIT`.
    fn close(&self) -> Result<()>;
}

type Responder = oneshot::Sender<Result<Bytes>>;

struct Request {
    cmd: Command,
    responder: Option<Responder>,
}

/// Connects over TCP using the shared [`Builder`] settings.
#[derive(Clone, Debug, Default)]
pub struct TcpConnector {
    cfg: Arc<Builder>,
}

impl TcpConnector {
    pub fn new(cfg: Builder) -> Self {
        TcpConnector { cfg: Arc::new(cfg) }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, id: ConnId, addr: &str, events: EventTx) -> Result<Box<dyn Connection>> {
        let conn = NsqConnection::connect(id, addr, self.cfg.clone(), events).await?;
        Ok(Box::new(conn))
    }
}

#[derive(Clone, Debug)]
pub struct NsqConnection {
    id: ConnId,
    addr: ByteString,
    max_ready: u32,
    tx: mpsc::UnboundedSender<Request>,
}

impl NsqConnection {
    pub async fn connect(id: ConnId, addr: &str, cfg: Arc<Builder>, events: EventTx) -> Result<NsqConnection> {
        let socket = match tokio::time::timeout(cfg.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(socket)) => socket,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(NsqError::ConnectTimeout.into()),
        };
        socket.set_nodelay(cfg.nodelay)?;
        let mut stream = NsqStream::new(socket, cfg);
        let features = stream.handshake().await?;
        log::debug!("{} {} handshake done, nsqd version: {:?}", id, addr, features.version);

        let (tx, rx) = mpsc::unbounded_channel();
        let addr = ByteString::from(addr);
        tokio::spawn(IoTask { id, addr: addr.clone(), stream, events, pending: VecDeque::new() }.run(rx));
        Ok(NsqConnection { id, addr, max_ready: features.max_rdy_count, tx })
    }

    /// Sends a command that nsqd answers, e.g. `PUB`, and waits for the answer.
    pub async fn request(&self, cmd: Command) -> Result<Bytes> {
        let (responder, rx) = oneshot::channel();
        self.push(cmd, Some(responder))?;
        rx.await.map_err(|_| NsqError::Disconnected)?
    }

    #[inline]
    fn push(&self, cmd: Command, responder: Option<Responder>) -> Result<()> {
        self.tx.send(Request { cmd, responder }).map_err(|_| NsqError::Disconnected)?;
        Ok(())
    }
}

impl Connection for NsqConnection {
    fn id(&self) -> ConnId {
        self.id
    }

    fn addr(&self) -> &str {
        &self.addr
    }

    fn max_ready(&self) -> u32 {
        self.max_ready
    }

    fn subscribe(&self, topic: &str, channel: &str) -> Result<()> {
        let cmd = Command::Subscribe { topic: ByteString::from(topic), channel: ByteString::from(channel) };
        self.push(cmd, None)
    }

    fn set_ready(&self, count: u32) -> Result<()> {
        self.push(Command::Ready(count.min(self.max_ready)), None)
    }

    fn finish(&self, id: MessageId) -> Result<()> {
        self.push(Command::Finish(id), None)
    }

    fn requeue(&self, id: MessageId, delay: Duration) -> Result<()> {
        self.push(Command::Requeue { id, timeout: delay }, None)
    }

    fn touch(&self, id: MessageId) -> Result<()> {
        self.push(Command::Touch(id), None)
    }

    fn close(&self) -> Result<()> {
        self.push(Command::Close, None)
    }
}

/// Owns the socket, one per connection.
struct IoTask {
    id: ConnId,
    addr: ByteString,
    stream: NsqStream<TcpStream>,
    events: EventTx,
    /// Commands awaiting a response frame, in send order
    pending: VecDeque<(&'static str, Option<Responder>)>,
}

impl IoTask {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Request>) {
        if let Err(e) = self.process(&mut rx).await {
            log::debug!("{} {} connection error, {:?}", self.id, self.addr, e);
            self.emit(Event::Error(e));
        }
        drop(rx);
        for (_, responder) in self.pending.drain(..) {
            if let Some(responder) = responder {
                let _ = responder.send(Err(NsqError::Disconnected.into()));
            }
        }
        if let Err(e) = self.stream.close().await {
            log::debug!("{} {} socket close error, {:?}", self.id, self.addr, e);
        }
        log::debug!("{} {} connection closed", self.id, self.addr);
        self.emit(Event::Closed);
    }

    async fn process(&mut self, rx: &mut mpsc::UnboundedReceiver<Request>) -> Result<()> {
        let read_timeout = self.stream.cfg.read_timeout();
        let far_future = Duration::from_secs(86400 * 365);
        let mut read_deadline = Instant::now() + read_timeout.unwrap_or(far_future);
        let mut close_deadline: Option<Instant> = None;
        let mut handles_dropped = false;

        loop {
            let deadline = match close_deadline {
                Some(close_deadline) => close_deadline.min(read_deadline),
                None => read_deadline,
            };
            tokio::select! {
                req = rx.recv(), if !handles_dropped => match req {
                    Some(Request { cmd, responder }) => {
                        if matches!(cmd, Command::Close) {
                            if close_deadline.is_some() {
                                continue;
                            }
                            close_deadline = Some(Instant::now() + self.stream.cfg.close_timeout);
                        }
                        if cmd.expects_response() {
                            self.pending.push_back((cmd.name(), responder));
                        }
                        self.stream.send(cmd).await?;
                    }
                    None => {
                        // every handle is gone, leave politely
                        handles_dropped = true;
                        if close_deadline.is_none() {
                            close_deadline = Some(Instant::now() + self.stream.cfg.close_timeout);
                            self.stream.send(Command::Close).await?;
                        }
                    }
                },
                frame = self.stream.next() => {
                    read_deadline = Instant::now() + read_timeout.unwrap_or(far_future);
                    match frame {
                        Some(Ok(frame)) => {
                            if self.handle_frame(frame).await? {
                                return Ok(());
                            }
                        }
                        Some(Err(e)) => return Err(e),
                        None => {
                            return if close_deadline.is_some() { Ok(()) } else { Err(NsqError::Disconnected.into()) }
                        }
                    }
                },
                _ = sleep_until(deadline) => {
                    return if close_deadline.is_some_and(|d| d <= Instant::now()) {
                        Err(NsqError::CloseTimeout.into())
                    } else {
                        Err(NsqError::ReadTimeout.into())
                    };
                }
            }
        }
    }

    /// Returns `true` once the connection is done.
    async fn handle_frame(&mut self, frame: Frame) -> Result<bool> {
        match frame {
            Frame::Message(msg) => self.emit(Event::Message(msg)),
            _ if frame.is_heartbeat() => {
                log::trace!("{} {} heartbeat", self.id, self.addr);
                self.stream.send(Command::Nop).await?;
            }
            _ if frame.is_close_wait() => {
                log::debug!("{} {} CLOSE_WAIT", self.id, self.addr);
                return Ok(true);
            }
            Frame::Response(data) => match self.pending.pop_front() {
                Some((name, responder)) => {
                    if name == "SUB" {
                        self.emit(Event::Ready);
                    }
                    if let Some(responder) = responder {
                        let _ = responder.send(Ok(data));
                    }
                }
                None => log::warn!("{} {} unexpected response, {:?}", self.id, self.addr, data),
            },
            Frame::Error(data) => {
                let err = NsqError::response(&data);
                if !err.is_fatal() {
                    log::warn!("{} {} {}", self.id, self.addr, err);
                    self.emit(Event::Error(err.into()));
                    return Ok(false);
                }
                if let Some((_, Some(responder))) = self.pending.pop_front() {
                    let _ = responder.send(Err(NsqError::response(&data).into()));
                }
                return Err(err.into());
            }
        }
        Ok(false)
    }

    #[inline]
    fn emit(&self, ev: Event) {
        if self.events.send((self.id, ev)).is_err() {
            log::trace!("{} {} event receiver is gone", self.id, self.addr);
        }
    }
}
