#![deny(unsafe_code)]

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use anyhow::anyhow;
use config::{Config, File};
use once_cell::sync::OnceCell;
use serde::Deserialize;

use rnsq_net::Result;

use self::logging::Log;

pub use self::connection::ConnectionConfig;
pub use self::reader::ReaderConfig;

pub mod connection;
pub mod logging;
pub mod reader;

static SETTINGS: OnceCell<Settings> = OnceCell::new();

#[derive(Clone)]
pub struct Settings(Arc<Inner>);

#[derive(Debug, Clone, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub log: Log,
    #[serde(default, skip)]
    pub opts: Options,
}

/// Overrides taken from the command line of the embedding program
#[derive(Debug, Clone, Default)]
pub struct Options {
    ///Explicit configuration file, read after the default locations
    pub cfg_name: Option<String>,
    pub topic: Option<String>,
    pub channel: Option<String>,
}

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Settings {
    pub fn new(opts: Options) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name("/etc/rnsq/rnsq").required(false))
            .add_source(File::with_name("rnsq").required(false));

        if let Some(cfg) = opts.cfg_name.as_ref() {
            builder = builder.add_source(File::with_name(cfg).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("rnsq")
                .separator("__")
                .try_parsing(true)
                .list_separator(" ")
                .with_list_parse_key("reader.nsqd")
                .with_list_parse_key("reader.nsqlookupd"),
        );

        let mut inner: Inner = builder.build()?.try_deserialize()?;

        //Command line configuration overriding file configuration
        if let Some(topic) = opts.topic.as_ref() {
            inner.reader.topic.clone_from(topic);
        }
        if let Some(channel) = opts.channel.as_ref() {
            inner.reader.channel.clone_from(channel);
        }

        inner.reader.validate()?;
        inner.opts = opts;
        Ok(Self(Arc::new(inner)))
    }

    #[inline]
    pub fn instance() -> &'static Self {
        match SETTINGS.get() {
            Some(c) => c,
            None => {
                unreachable!("Settings not initialized");
            }
        }
    }

    #[inline]
    pub fn init(opts: Options) -> Result<&'static Self> {
        SETTINGS.set(Settings::new(opts)?).map_err(|_| anyhow!("Settings init failed"))?;
        SETTINGS.get().ok_or_else(|| anyhow!("Settings init failed"))
    }

    #[inline]
    pub fn logs() -> Result<()> {
        let cfg = Self::instance();
        log::debug!("Config info is {:?}", cfg.0);
        log::info!("topic is {}, channel is {}", cfg.reader.topic, cfg.reader.channel);
        log::info!("nsqd is {:?}", cfg.reader.nsqd);
        log::info!("nsqlookupd is {:?}", cfg.reader.nsqlookupd);
        log::info!("max_in_flight is {}", cfg.reader.max_in_flight);
        log::info!("max_attempts is {}", cfg.reader.max_attempts);
        if cfg.reader.is_dynamic() {
            log::info!("poll_interval is {:?}", cfg.reader.poll_interval);
        }
        Ok(())
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Settings ...")?;
        Ok(())
    }
}
