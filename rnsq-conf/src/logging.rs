use std::path::PathBuf;

use serde::Deserialize;

/// `[log]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Log {
    pub to: To,
    #[serde(deserialize_with = "rnsq_utils::deserialize_level")]
    pub level: slog::Level,
    pub file: PathBuf,
}

impl Default for Log {
    fn default() -> Self {
        Self { to: To::Console, level: slog::Level::Info, file: PathBuf::from("/var/log/rnsq/rnsq.log") }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum To {
    Off,
    File,
    Console,
    Both,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config() {
        let log: Log = serde_json::from_str(r#"{"to": "both", "level": "debug", "file": "/tmp/rnsq/reader.log"}"#).unwrap();
        assert_eq!(log.to, To::Both);
        assert_eq!(log.level, slog::Level::Debug);
        assert_eq!(log.file, PathBuf::from("/tmp/rnsq/reader.log"));

        let log: Log = serde_json::from_str(r#"{"level": "warn"}"#).unwrap();
        assert_eq!(log.to, To::Console);
        assert_eq!(log.level, slog::Level::Warning);
        assert_eq!(log.file, Log::default().file);

        assert!(serde_json::from_str::<Log>(r#"{"level": "loud"}"#).is_err());
        assert!(serde_json::from_str::<Log>(r#"{"to": "syslog"}"#).is_err());
    }
}
