use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use bytestring::ByteString;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use rnsq_codec::error::EncodeError;
use rnsq_codec::{is_valid_topic_name, Command};
use rnsq_net::{Builder, Connection, Event, NsqConnection, NsqError, Result};

/// Publishes to one nsqd.
pub struct Writer {
    conn: NsqConnection,
    closed: Arc<AtomicBool>,
    watcher: JoinHandle<()>,
}

impl Writer {
    pub async fn connect(addr: &str, cfg: Builder) -> Result<Writer> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = NsqConnection::connect(0, addr, Arc::new(cfg), tx).await?;
        let closed = Arc::new(AtomicBool::new(false));
        let watcher = {
            let closed = closed.clone();
            let addr = addr.to_owned();
            tokio::spawn(async move {
                while let Some((_, ev)) = rx.recv().await {
                    match ev {
                        Event::Error(e) => log::warn!("writer to {} error, {}", addr, e),
                        Event::Closed => {
                            log::debug!("writer to {} closed", addr);
                            closed.store(true, Ordering::SeqCst);
                        }
                        Event::Ready | Event::Message(_) => {}
                    }
                }
            })
        };
        Ok(Writer { conn, closed, watcher })
    }

    #[inline]
    pub fn addr(&self) -> &str {
        self.conn.addr()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn publish<T, B>(&self, topic: T, body: B) -> Result<()>
    where
        T: Into<ByteString>,
        B: Into<Bytes>,
    {
        self.request(Command::Publish { topic: checked(topic)?, body: body.into() }).await
    }

    /// Publishes a batch atomically.
    pub async fn multi_publish<T: Into<ByteString>>(&self, topic: T, bodies: Vec<Bytes>) -> Result<()> {
        if bodies.is_empty() {
            return Err(NsqError::Encode(EncodeError::EmptyBatch).into());
        }
        self.request(Command::MultiPublish { topic: checked(topic)?, bodies }).await
    }

    /// The message becomes visible to consumers after `delay`.
    pub async fn deferred_publish<T, B>(&self, topic: T, delay: Duration, body: B) -> Result<()>
    where
        T: Into<ByteString>,
        B: Into<Bytes>,
    {
        self.request(Command::DeferredPublish { topic: checked(topic)?, defer: delay, body: body.into() }).await
    }

    pub fn close(&self) -> Result<()> {
        self.conn.close()
    }

    async fn request(&self, cmd: Command) -> Result<()> {
        if self.is_closed() {
            return Err(NsqError::Disconnected.into());
        }
        let resp = self.conn.request(cmd).await?;
        if resp.as_ref() != b"OK" {
            return Err(NsqError::Protocol(format!("unexpected response {:?}", String::from_utf8_lossy(&resp))).into());
        }
        Ok(())
    }
}

/// Rejected names never reach the connection, an encoding error there would close it.
fn checked<T: Into<ByteString>>(topic: T) -> Result<ByteString> {
    let topic = topic.into();
    if !is_valid_topic_name(&topic) {
        return Err(NsqError::Encode(EncodeError::InvalidName(topic.to_string())).into());
    }
    Ok(topic)
}

impl Drop for Writer {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;

    fn frame(frame_type: i32, data: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u32(4 + data.len() as u32);
        buf.put_i32(frame_type);
        buf.put_slice(data);
        buf.to_vec()
    }

    async fn read_line(sock: &mut TcpStream) -> String {
        let mut line = Vec::new();
        loop {
            let b = sock.read_u8().await.unwrap();
            if b == b'\n' {
                return String::from_utf8(line).unwrap();
            }
            line.push(b);
        }
    }

    async fn read_body(sock: &mut TcpStream) -> Vec<u8> {
        let len = sock.read_u32().await.unwrap();
        let mut body = vec![0u8; len as usize];
        sock.read_exact(&mut body).await.unwrap();
        body
    }

    async fn nsqd() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    async fn accept(listener: &TcpListener) -> TcpStream {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut magic = [0u8; 4];
        sock.read_exact(&mut magic).await.unwrap();
        assert_eq!(read_line(&mut sock).await, "IDENTIFY");
        read_body(&mut sock).await;
        sock.write_all(&frame(0, b"OK")).await.unwrap();
        sock
    }

    #[tokio::test]
    async fn test_publish() {
        let (listener, addr) = nsqd().await;
        let server = tokio::spawn(async move {
            let mut sock = accept(&listener).await;
            assert_eq!(read_line(&mut sock).await, "PUB orders");
            assert_eq!(read_body(&mut sock).await, b"one");
            sock.write_all(&frame(0, b"OK")).await.unwrap();

            assert_eq!(read_line(&mut sock).await, "MPUB orders");
            let batch = read_body(&mut sock).await;
            assert_eq!(&batch[..4], &2u32.to_be_bytes());
            sock.write_all(&frame(0, b"OK")).await.unwrap();

            assert_eq!(read_line(&mut sock).await, "DPUB orders 1500");
            assert_eq!(read_body(&mut sock).await, b"later");
            sock.write_all(&frame(0, b"OK")).await.unwrap();
            sock
        });

        let writer = Writer::connect(&addr, Builder::new()).await.unwrap();
        writer.publish("orders", "one").await.unwrap();
        writer.multi_publish("orders", vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]).await.unwrap();
        writer.deferred_publish("orders", Duration::from_millis(1500), "later").await.unwrap();
        assert!(!writer.is_closed());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_rejected() {
        let (listener, addr) = nsqd().await;
        let server = tokio::spawn(async move {
            let mut sock = accept(&listener).await;
            assert_eq!(read_line(&mut sock).await, "PUB orders");
            read_body(&mut sock).await;
            sock.write_all(&frame(1, b"E_PUB_FAILED PUB failed")).await.unwrap();
            sock
        });

        let writer = Writer::connect(&addr, Builder::new()).await.unwrap();
        let err = writer.publish("orders", "one").await.unwrap_err();
        assert!(matches!(err.downcast_ref::<NsqError>(), Some(NsqError::Response { code, .. }) if code == "E_PUB_FAILED"));
        let _sock = server.await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(writer.is_closed());
        assert!(writer.publish("orders", "two").await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_topic() {
        let (listener, addr) = nsqd().await;
        let server = tokio::spawn(async move { accept(&listener).await });
        let writer = Writer::connect(&addr, Builder::new()).await.unwrap();
        let _sock = server.await.unwrap();
        assert!(writer.publish("not a topic", "x").await.is_err());
        assert!(writer.multi_publish("orders", vec![]).await.is_err());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!writer.is_closed());
    }
}
