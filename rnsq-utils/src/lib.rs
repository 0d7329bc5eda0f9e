//! Utilities shared by the rnsq crates
//!
//! ## Core Features:
//! - **Duration Conversion**: String-to-Duration parsing supporting multiple time units
//! - **Timestamp Utilities**: millisecond timestamps
//! - **Address Handling**: `host:port` parsing for nsqd and nsqlookupd endpoints
//! - **Counter Implementation**: Thread-safe gauge with high-water mark ([`Counter`])
//!
//! ## Usage Examples:
//! ```rust
//! use rnsq_utils::{parse_addr, to_duration, Counter};
//!
//! let poll_interval = to_duration("20s");
//! assert_eq!(poll_interval.as_secs(), 20);
//!
//! let addr = parse_addr("127.0.0.1:4150").unwrap();
//! assert_eq!(addr, "127.0.0.1:4150");
//!
//! let inflight = Counter::new();
//! inflight.inc();
//! assert_eq!(inflight.count(), 1);
//! ```

#![deny(unsafe_code)]

use std::time::Duration;

use anyhow::anyhow;
use bytestring::ByteString;
use serde::{
    de::{self, Deserializer},
    ser::Serializer,
    Deserialize, Serialize,
};

mod counter;

pub use counter::Counter;

/// Network address (`host:port`) of an nsqd or nsqlookupd node
pub type Addr = ByteString;

/// Timestamp representation in milliseconds since Unix epoch
pub type TimestampMillis = i64;

/// Deserialize Duration from human-readable string format
#[inline]
pub fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let v = String::deserialize(deserializer)?;
    Ok(to_duration(&v))
}

/// Deserialize optional Duration from string
#[inline]
pub fn deserialize_duration_option<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = String::deserialize(deserializer)?;
    if v.is_empty() {
        Ok(None)
    } else {
        Ok(Some(to_duration(&v)))
    }
}

/// Serialize Duration as milliseconds string, e.g. `"1500ms"`
#[inline]
pub fn serialize_duration<S>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    format!("{}ms", d.as_millis()).serialize(s)
}

/// Convert human-readable duration string to Duration
///
/// # Supported units:
/// - ms: milliseconds
/// - s: seconds
/// - m: minutes
/// - h: hours
/// - d: days
///
/// # Example:
/// ```
/// let duration = rnsq_utils::to_duration("1h30m15s");
/// assert_eq!(duration.as_secs(), 5415);
///
/// let poll = rnsq_utils::to_duration("500ms");
/// assert_eq!(poll.as_millis(), 500);
/// ```
#[inline]
pub fn to_duration(text: &str) -> Duration {
    let text = text.to_lowercase().replace("ms", "Y");
    let ms: u64 = text
        .split_inclusive(['s', 'm', 'h', 'd', 'Y'])
        .map(|x| {
            let mut chars = x.chars();
            let u = match chars.nth_back(0) {
                None => return 0,
                Some(u) => u,
            };
            let v = match chars.as_str().parse::<u64>() {
                Err(_e) => return 0,
                Ok(v) => v,
            };
            match u {
                'Y' => v,
                's' => v * 1000,
                'm' => v * 60000,
                'h' => v * 3600000,
                'd' => v * 86400000,
                _ => 0,
            }
        })
        .sum();
    Duration::from_millis(ms)
}

/// Validate and normalize a `host:port` address
///
/// # Example:
/// ```
/// let addr = rnsq_utils::parse_addr(" 127.0.0.1:4150 ").unwrap();
/// assert_eq!(addr, "127.0.0.1:4150");
/// assert!(rnsq_utils::parse_addr("127.0.0.1").is_err());
/// ```
#[inline]
pub fn parse_addr(addr: &str) -> anyhow::Result<Addr> {
    let addr = addr.trim();
    let (host, port) = addr.rsplit_once(':').ok_or_else(|| anyhow!("address must be host:port, {:?}", addr))?;
    if host.is_empty() {
        return Err(anyhow!("address host is empty, {:?}", addr));
    }
    port.parse::<u16>().map_err(|e| anyhow!("address port is invalid, {:?}, {}", addr, e))?;
    Ok(Addr::from(addr))
}

/// Deserialize a list of `host:port` addresses
#[inline]
pub fn deserialize_addrs<'de, D>(deserializer: D) -> std::result::Result<Vec<Addr>, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<String>::deserialize(deserializer)?
        .iter()
        .map(|addr| parse_addr(addr).map_err(de::Error::custom))
        .collect()
}

/// Deserialize a `slog::Level` from its name, e.g. `"debug"` or `"warn"`
#[inline]
pub fn deserialize_level<'de, D>(deserializer: D) -> std::result::Result<slog::Level, D::Error>
where
    D: Deserializer<'de>,
{
    let level = String::deserialize(deserializer)?;
    level.parse::<slog::Level>().map_err(|_| de::Error::custom(format!("invalid log level {level:?}")))
}

/// Get current timestamp in milliseconds
///
/// # Example:
/// ```
/// let ts = rnsq_utils::timestamp_millis();
/// assert!(ts > 0);
/// ```
#[inline]
pub fn timestamp_millis() -> TimestampMillis {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|t| t.as_millis() as i64)
        .unwrap_or_else(|_| chrono::Local::now().timestamp_millis())
}
