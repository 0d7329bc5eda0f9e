#![deny(unsafe_code)]

//! # Overall Example
//! ```rust,no_run
//!
//! use std::time::Duration;
//!
//! use rnsq::conf::ReaderConfig;
//! use rnsq::net::{Builder, Result};
//! use rnsq::{Reader, ReaderEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let cfg = ReaderConfig::new("orders", "billing")
//!         .nsqlookupd(&["127.0.0.1:4161"])?
//!         .max_in_flight(10)
//!         .max_attempts(5);
//!     let mut reader = Reader::new(cfg, Builder::new().heartbeat_interval(Duration::from_secs(10)))?;
//!
//!     while let Some(ev) = reader.recv().await {
//!         match ev {
//!             ReaderEvent::Message(msg) => msg.finish()?,
//!             ReaderEvent::Discard(msg) => log::warn!("gave up on {}", msg.id()),
//!             ReaderEvent::Error(e) => log::warn!("{}", e),
//!             ReaderEvent::Ready => log::info!("ready"),
//!             ReaderEvent::Close => break,
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod discovery;
pub mod flow;
pub mod logger;
pub mod message;
pub mod reader;
pub mod stats;
pub mod tracker;
pub mod writer;

#[cfg(test)]
mod mock;

pub use discovery::{HttpLookup, Lookup, PollTimer};
pub use flow::FlowController;
pub use message::{Message, MessageState};
pub use reader::{Closing, Reader, ReaderEvent, ReaderState};
pub use stats::Stats;
pub use tracker::MessageTracker;
pub use writer::Writer;

pub use rnsq_codec as codec;
pub use rnsq_conf as conf;
pub use rnsq_net as net;
pub use rnsq_utils as utils;

pub type Error = anyhow::Error;
pub type Result<T> = anyhow::Result<T, Error>;
