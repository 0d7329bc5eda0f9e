use std::time::Duration;

use serde::Deserialize;

use rnsq_net::Builder;
use rnsq_utils::deserialize_duration;

/// Settings of every nsqd connection, mapped onto [`Builder`].
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default = "ConnectionConfig::heartbeat_interval_default", deserialize_with = "deserialize_duration")]
    pub heartbeat_interval: Duration,
    //0 keeps the nsqd default
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub msg_timeout: Duration,
    #[serde(default = "ConnectionConfig::connect_timeout_default", deserialize_with = "deserialize_duration")]
    pub connect_timeout: Duration,
    #[serde(default = "ConnectionConfig::send_timeout_default", deserialize_with = "deserialize_duration")]
    pub send_timeout: Duration,
    #[serde(default = "ConnectionConfig::close_timeout_default", deserialize_with = "deserialize_duration")]
    pub close_timeout: Duration,
    #[serde(default = "ConnectionConfig::max_frame_size_default")]
    pub max_frame_size: u32,
    #[serde(default = "ConnectionConfig::nodelay_default")]
    pub nodelay: bool,
}

impl Default for ConnectionConfig {
    #[inline]
    fn default() -> Self {
        Self {
            client_id: None,
            hostname: None,
            user_agent: None,
            heartbeat_interval: Self::heartbeat_interval_default(),
            msg_timeout: Duration::ZERO,
            connect_timeout: Self::connect_timeout_default(),
            send_timeout: Self::send_timeout_default(),
            close_timeout: Self::close_timeout_default(),
            max_frame_size: Self::max_frame_size_default(),
            nodelay: Self::nodelay_default(),
        }
    }
}

impl ConnectionConfig {
    fn heartbeat_interval_default() -> Duration {
        Duration::from_secs(30)
    }
    fn connect_timeout_default() -> Duration {
        Duration::from_secs(5)
    }
    fn send_timeout_default() -> Duration {
        Duration::from_secs(10)
    }
    fn close_timeout_default() -> Duration {
        Duration::from_secs(5)
    }
    fn max_frame_size_default() -> u32 {
        4 * 1024 * 1024
    }
    fn nodelay_default() -> bool {
        true
    }

    pub fn to_builder(&self) -> Builder {
        let mut builder = Builder::new()
            .heartbeat_interval(self.heartbeat_interval)
            .msg_timeout(self.msg_timeout)
            .connect_timeout(self.connect_timeout)
            .send_timeout(self.send_timeout)
            .close_timeout(self.close_timeout)
            .max_frame_size(self.max_frame_size)
            .nodelay(self.nodelay);
        if let Some(client_id) = self.client_id.as_ref() {
            builder = builder.client_id(client_id);
        }
        if let Some(hostname) = self.hostname.as_ref() {
            builder = builder.hostname(hostname);
        }
        if let Some(user_agent) = self.user_agent.as_ref() {
            builder = builder.user_agent(user_agent);
        }
        builder
    }
}
