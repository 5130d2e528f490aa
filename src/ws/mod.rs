//! Self-healing WebSocket connection.
//!
//! [`ConnectionManager`] keeps one logical message stream alive across transport drops:
//! every closure (server close, network error, failed open) schedules a reconnect, each
//! attempt re-resolves its target through an [`EndpointSource`](crate::endpoint::EndpointSource),
//! and every decoded inbound message lands in one [`MessageLog`] that survives reconnects.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: Owns the driver task, the state channel and the message log
//! - [`MessageParser`]: Trait for decoding inbound text frames ([`JsonParser`] by default)
//! - [`MessageLog`]: Append-only record of decoded messages with change notification
//! - [`ReconnectPolicy`]: Delay between a closure and the next attempt

pub mod config;
pub mod connection;
pub mod error;
pub mod log;
pub mod traits;

pub use config::{Config, ReconnectConfig, ReconnectPolicy};
pub use connection::{ConnectionManager, ConnectionState};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use log::MessageLog;
pub use traits::*;
