use std::time::Duration;

use serde::Deserialize;

use rnsq_codec::{is_valid_channel_name, is_valid_topic_name};
use rnsq_net::{NsqError, Result};
use rnsq_utils::{deserialize_addrs, deserialize_duration, parse_addr, Addr};

/// Consumer settings, one reader per topic/channel pair.
#[derive(Debug, Clone, Deserialize)]
pub struct ReaderConfig {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub channel: String,
    ///Static nsqd TCP addresses, never removed by discovery
    #[serde(default, deserialize_with = "deserialize_addrs")]
    pub nsqd: Vec<Addr>,
    ///nsqlookupd HTTP addresses, enables discovery when not empty
    #[serde(default, deserialize_with = "deserialize_addrs")]
    pub nsqlookupd: Vec<Addr>,
    ///Upper bound of messages in flight across all connections
    #[serde(default = "ReaderConfig::max_in_flight_default")]
    pub max_in_flight: u32,
    ///Deliveries beyond this attempt are discarded, 0 means unlimited
    #[serde(default)]
    pub max_attempts: u16,
    #[serde(default = "ReaderConfig::poll_interval_default", deserialize_with = "deserialize_duration")]
    pub poll_interval: Duration,
    ///Per request timeout of a lookup
    #[serde(default = "ReaderConfig::lookup_timeout_default", deserialize_with = "deserialize_duration")]
    pub lookup_timeout: Duration,
    ///First reconnect delay, doubled on every failed attempt
    #[serde(default = "ReaderConfig::reconnect_interval_default", deserialize_with = "deserialize_duration")]
    pub reconnect_interval: Duration,
    #[serde(
        default = "ReaderConfig::reconnect_max_interval_default",
        deserialize_with = "deserialize_duration"
    )]
    pub reconnect_max_interval: Duration,
    ///Failed reconnects before an address is dropped, 0 means unlimited
    #[serde(default = "ReaderConfig::max_reconnect_attempts_default")]
    pub max_reconnect_attempts: usize,
    ///With fewer credits than connections, an idle credit moves on after this long
    #[serde(
        default = "ReaderConfig::low_rdy_idle_timeout_default",
        deserialize_with = "deserialize_duration"
    )]
    pub low_rdy_idle_timeout: Duration,
}

impl Default for ReaderConfig {
    #[inline]
    fn default() -> Self {
        Self {
            topic: String::new(),
            channel: String::new(),
            nsqd: Vec::new(),
            nsqlookupd: Vec::new(),
            max_in_flight: Self::max_in_flight_default(),
            max_attempts: 0,
            poll_interval: Self::poll_interval_default(),
            lookup_timeout: Self::lookup_timeout_default(),
            reconnect_interval: Self::reconnect_interval_default(),
            reconnect_max_interval: Self::reconnect_max_interval_default(),
            max_reconnect_attempts: Self::max_reconnect_attempts_default(),
            low_rdy_idle_timeout: Self::low_rdy_idle_timeout_default(),
        }
    }
}

impl ReaderConfig {
    fn max_in_flight_default() -> u32 {
        1
    }
    fn poll_interval_default() -> Duration {
        Duration::from_secs(20)
    }
    fn lookup_timeout_default() -> Duration {
        Duration::from_secs(5)
    }
    fn reconnect_interval_default() -> Duration {
        Duration::from_secs(1)
    }
    fn reconnect_max_interval_default() -> Duration {
        Duration::from_secs(60)
    }
    fn max_reconnect_attempts_default() -> usize {
        10
    }
    fn low_rdy_idle_timeout_default() -> Duration {
        Duration::from_secs(10)
    }

    pub fn new<T: Into<String>, C: Into<String>>(topic: T, channel: C) -> Self {
        Self { topic: topic.into(), channel: channel.into(), ..Default::default() }
    }

    pub fn nsqd<A: AsRef<str>>(mut self, addrs: &[A]) -> Result<Self> {
        self.nsqd = addrs.iter().map(|a| parse_addr(a.as_ref())).collect::<Result<Vec<_>>>()?;
        Ok(self)
    }

    pub fn nsqlookupd<A: AsRef<str>>(mut self, addrs: &[A]) -> Result<Self> {
        self.nsqlookupd = addrs.iter().map(|a| parse_addr(a.as_ref())).collect::<Result<Vec<_>>>()?;
        Ok(self)
    }

    pub fn max_in_flight(mut self, max_in_flight: u32) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u16) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn lookup_timeout(mut self, lookup_timeout: Duration) -> Self {
        self.lookup_timeout = lookup_timeout;
        self
    }

    pub fn reconnect_interval(mut self, reconnect_interval: Duration) -> Self {
        self.reconnect_interval = reconnect_interval;
        self
    }

    pub fn reconnect_max_interval(mut self, reconnect_max_interval: Duration) -> Self {
        self.reconnect_max_interval = reconnect_max_interval;
        self
    }

    pub fn max_reconnect_attempts(mut self, max_reconnect_attempts: usize) -> Self {
        self.max_reconnect_attempts = max_reconnect_attempts;
        self
    }

    pub fn low_rdy_idle_timeout(mut self, low_rdy_idle_timeout: Duration) -> Self {
        self.low_rdy_idle_timeout = low_rdy_idle_timeout;
        self
    }

    /// Discovery runs when at least one nsqlookupd is configured.
    #[inline]
    pub fn is_dynamic(&self) -> bool {
        !self.nsqlookupd.is_empty()
    }

    /// Rejects settings a reader can never become ready with.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_topic_name(&self.topic) {
            return Err(NsqError::InvalidConfig(format!("invalid topic name {:?}", self.topic)).into());
        }
        if !is_valid_channel_name(&self.channel) {
            return Err(NsqError::InvalidConfig(format!("invalid channel name {:?}", self.channel)).into());
        }
        if self.nsqd.is_empty() && self.nsqlookupd.is_empty() {
            return Err(NsqError::InvalidConfig("no nsqd or nsqlookupd address configured".into()).into());
        }
        if self.max_in_flight == 0 {
            return Err(NsqError::InvalidConfig("max_in_flight must be at least 1".into()).into());
        }
        if self.is_dynamic() && self.poll_interval.is_zero() {
            return Err(NsqError::InvalidConfig("poll_interval must not be zero".into()).into());
        }
        if self.low_rdy_idle_timeout.is_zero() {
            return Err(NsqError::InvalidConfig("low_rdy_idle_timeout must not be zero".into()).into());
        }
        Ok(())
    }
}
