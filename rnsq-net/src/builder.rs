use std::time::Duration;

use serde::Serialize;

/// Client side settings applied to every connection made to nsqd.
#[derive(Clone, Debug)]
pub struct Builder {
    ///Identifier of this client, sent in `IDENTIFY`, default: short hostname
    pub client_id: String,
    ///Hostname sent in `IDENTIFY`
    pub hostname: String,
    ///User agent sent in `IDENTIFY`, default: `rnsq/<version>`
    pub user_agent: String,
    ///Heartbeat interval requested from nsqd, zero disables heartbeats.
    ///No frame within two intervals is treated as a dead connection, default: 30s
    pub heartbeat_interval: Duration,
    ///Server side timeout for in-flight messages, zero keeps the nsqd default
    pub msg_timeout: Duration,
    ///TCP connect plus handshake timeout, default: 5s
    pub connect_timeout: Duration,
    ///Send timeout, zero means no timeout, default: 10s
    pub send_timeout: Duration,
    ///Time to wait for `CLOSE_WAIT` after `CLS`, default: 5s
    pub close_timeout: Duration,
    ///Maximum allowed inbound frame size. 0 means unlimited, default: 4M
    pub max_frame_size: u32,
    ///Sets the value of the TCP_NODELAY option on this socket.
    pub nodelay: bool,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Builder {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".into());
        Builder {
            client_id: hostname.split('.').next().unwrap_or_default().to_owned(),
            hostname,
            user_agent: format!("rnsq/{}", env!("CARGO_PKG_VERSION")),
            heartbeat_interval: Duration::from_secs(30),
            msg_timeout: Duration::ZERO,
            connect_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
            max_frame_size: 4 * 1024 * 1024,
            nodelay: true,
        }
    }

    pub fn client_id<N: Into<String>>(mut self, client_id: N) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn hostname<N: Into<String>>(mut self, hostname: N) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn user_agent<N: Into<String>>(mut self, user_agent: N) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }

    pub fn msg_timeout(mut self, msg_timeout: Duration) -> Self {
        self.msg_timeout = msg_timeout;
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    pub fn close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    pub fn max_frame_size(mut self, max_frame_size: u32) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// No frame within this window means the connection is dead.
    #[inline]
    pub fn read_timeout(&self) -> Option<Duration> {
        if self.heartbeat_interval.is_zero() {
            None
        } else {
            Some(self.heartbeat_interval * 2)
        }
    }

    pub(crate) fn identify(&self) -> Identify<'_> {
        Identify {
            client_id: &self.client_id,
            hostname: &self.hostname,
            user_agent: &self.user_agent,
            heartbeat_interval: if self.heartbeat_interval.is_zero() {
                -1
            } else {
                self.heartbeat_interval.as_millis() as i64
            },
            msg_timeout: if self.msg_timeout.is_zero() { None } else { Some(self.msg_timeout.as_millis() as u64) },
            feature_negotiation: true,
        }
    }
}

/// Body of the `IDENTIFY` command
#[derive(Serialize, Debug)]
pub(crate) struct Identify<'a> {
    pub client_id: &'a str,
    pub hostname: &'a str,
    pub user_agent: &'a str,
    /// milliseconds, -1 disables heartbeats
    pub heartbeat_interval: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg_timeout: Option<u64>,
    pub feature_negotiation: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify() {
        let cfg = Builder::new().client_id("worker-1").hostname("worker-1.local").user_agent("test/1.0");
        let body = serde_json::to_value(cfg.identify()).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "client_id": "worker-1",
                "hostname": "worker-1.local",
                "user_agent": "test/1.0",
                "heartbeat_interval": 30000,
                "feature_negotiation": true
            })
        );
        assert_eq!(cfg.read_timeout(), Some(Duration::from_secs(60)));

        let cfg = cfg.heartbeat_interval(Duration::ZERO).msg_timeout(Duration::from_secs(90));
        let body = serde_json::to_value(cfg.identify()).unwrap();
        assert_eq!(body["heartbeat_interval"], -1);
        assert_eq!(body["msg_timeout"], 90000);
        assert_eq!(cfg.read_timeout(), None);
    }
}
