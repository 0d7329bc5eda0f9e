#![deny(unsafe_code)]

//! NSQ TCP protocol (V2) codec
//!
//! ## Core Features:
//! - **Command Encoding**: every client command of the V2 protocol (`IDENTIFY`, `SUB`, `RDY`,
//!   `FIN`, `REQ`, `TOUCH`, `CLS`, `NOP`, `PUB`, `MPUB`, `DPUB`) plus the initial magic
//! - **Frame Decoding**: size-prefixed response, error and message frames
//! - **Tokio Integration**: usable with `tokio_util::codec::Framed` and friends
//! - **Size Limits**: inbound frames larger than the configured maximum are rejected
//!
//! ## Architecture Components:
//! - `NsqCodec`: `Encoder<Command>` and `Decoder<Item = Frame>`
//! - `Command`: outbound commands
//! - `Frame`/`Message`: inbound frames
//! - `EncodeError`/`DecodeError`: dedicated error types

#[macro_use]
mod utils;

/// Error types for encoding/decoding operations
pub mod error;

/// Shared types and constants of the NSQ protocol
pub mod types;

/// Outbound client commands
pub mod command;

/// Codec implementation
pub mod codec;

pub use codec::NsqCodec;
pub use command::Command;
pub use types::{Frame, FrameType, Message, MessageId};
pub use utils::{is_valid_channel_name, is_valid_topic_name};
