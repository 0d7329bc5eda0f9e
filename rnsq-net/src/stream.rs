use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use rnsq_codec::{Command, Frame, NsqCodec};

use crate::error::NsqError;
use crate::{Builder, Result};

/// nsqd reply to `IDENTIFY` when feature negotiation is enabled
#[derive(Deserialize, Debug, Clone, Default)]
pub struct IdentifyResponse {
    #[serde(default = "IdentifyResponse::max_rdy_count_default")]
    pub max_rdy_count: u32,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub msg_timeout: u64,
    #[serde(default)]
    pub auth_required: bool,
}

impl IdentifyResponse {
    fn max_rdy_count_default() -> u32 {
        2500
    }

    fn parse(data: &[u8]) -> Result<Self> {
        if data == rnsq_codec::types::OK_RESPONSE {
            return Ok(IdentifyResponse { max_rdy_count: Self::max_rdy_count_default(), ..Default::default() });
        }
        serde_json::from_slice(data)
            .map_err(|e| NsqError::Handshake(format!("invalid IDENTIFY response, {}", e)).into())
    }
}

/// Framed NSQ stream with send/recv timeouts
pub struct NsqStream<Io> {
    pub io: Framed<Io, NsqCodec>,
    pub cfg: Arc<Builder>,
}

impl<Io> NsqStream<Io>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: Io, cfg: Arc<Builder>) -> Self {
        NsqStream { io: Framed::new(io, NsqCodec::new(cfg.max_frame_size)), cfg }
    }

    /// Sends the magic and `IDENTIFY`, returns the negotiated features.
    pub async fn handshake(&mut self) -> Result<IdentifyResponse> {
        let body = serde_json::to_vec(&self.cfg.identify())?;
        self.send(Command::Magic).await?;
        self.send(Command::Identify(Bytes::from(body))).await?;
        let resp = match self.recv(self.cfg.connect_timeout).await? {
            Some(Frame::Response(data)) => IdentifyResponse::parse(&data)?,
            Some(Frame::Error(data)) => {
                return Err(NsqError::Handshake(String::from_utf8_lossy(&data).into_owned()).into())
            }
            Some(Frame::Message(_)) => {
                return Err(NsqError::Handshake("unexpected message frame".into()).into())
            }
            None => return Err(NsqError::Disconnected.into()),
        };
        if resp.auth_required {
            return Err(NsqError::Handshake("nsqd requires AUTH, which is not supported".into()).into());
        }
        Ok(resp)
    }

    #[inline]
    pub async fn send(&mut self, cmd: Command) -> Result<()> {
        send(&mut self.io, cmd, self.cfg.send_timeout).await
    }

    #[inline]
    pub async fn close(&mut self) -> Result<()> {
        close(&mut self.io, self.cfg.send_timeout).await
    }

    #[inline]
    pub async fn recv(&mut self, tm: Duration) -> Result<Option<Frame>> {
        match tokio::time::timeout(tm, self.next()).await {
            Ok(Some(Ok(frame))) => Ok(Some(frame)),
            Ok(Some(Err(e))) => Err(e),
            Ok(None) => Ok(None),
            Err(_) => Err(NsqError::ReadTimeout.into()),
        }
    }

    #[inline]
    pub async fn next(&mut self) -> Option<Result<Frame>> {
        self.io.next().await.map(|res| res.map_err(|e| NsqError::Decode(e).into()))
    }
}

#[inline]
async fn send<Io>(io: &mut Framed<Io, NsqCodec>, cmd: Command, send_timeout: Duration) -> Result<()>
where
    Io: AsyncWrite + Unpin,
{
    if send_timeout.is_zero() {
        io.send(cmd).await.map_err(NsqError::Encode)?;
        Ok(())
    } else {
        match tokio::time::timeout(send_timeout, io.send(cmd)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(NsqError::Encode(e)),
            Err(_) => Err(NsqError::WriteTimeout),
        }?;
        Ok(())
    }
}

#[inline]
async fn close<Io>(io: &mut Framed<Io, NsqCodec>, send_timeout: Duration) -> Result<()>
where
    Io: AsyncWrite + Unpin,
{
    if send_timeout.is_zero() {
        SinkExt::<Command>::close(io).await.map_err(NsqError::Encode)?;
        Ok(())
    } else {
        match tokio::time::timeout(send_timeout, SinkExt::<Command>::close(io)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(NsqError::Encode(e)),
            Err(_) => Err(NsqError::CloseTimeout),
        }?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify_response() {
        let resp = IdentifyResponse::parse(b"OK").unwrap();
        assert_eq!(resp.max_rdy_count, 2500);

        let resp = IdentifyResponse::parse(
            br#"{"max_rdy_count":100,"version":"1.3.0","msg_timeout":60000,"auth_required":false}"#,
        )
        .unwrap();
        assert_eq!(resp.max_rdy_count, 100);
        assert_eq!(resp.version, "1.3.0");

        assert!(IdentifyResponse::parse(b"{bogus").is_err());
    }
}
