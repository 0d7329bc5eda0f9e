#![deny(unsafe_code)]

//! Connection primitive of the NSQ client
//!
//! A connection is an independent I/O task that owns one TCP socket to nsqd. Commands
//! (`SUB`, `RDY`, `FIN`, `REQ`, `TOUCH`, `CLS`) are queued to it without waiting,
//! inbound frames are pushed as [`Event`]s into a channel shared by all connections of
//! a reader. Heartbeats are answered internally.

mod builder;
mod connection;
mod error;
mod stream;

pub use builder::Builder;
pub use connection::{ConnId, Connection, Connector, Event, EventRx, EventTx, NsqConnection, TcpConnector};
pub use error::NsqError;
pub use stream::{IdentifyResponse, NsqStream};

pub type Error = anyhow::Error;
pub type Result<T> = anyhow::Result<T, Error>;
