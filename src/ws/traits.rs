//! Core traits for decoding inbound frames.

use serde::de::DeserializeOwned;

use super::error::WsError;

/// Message parser trait for converting a raw text frame into a message.
///
/// A frame that fails to parse is dropped by the connection manager; the connection
/// stays open.
///
/// # Example
///
/// ```ignore
/// pub struct TaggedParser;
///
/// impl MessageParser<Event> for TaggedParser {
///     fn parse(&self, bytes: &[u8]) -> Result<Event, WsError> {
///         serde_json::from_slice(bytes).map_err(WsError::MessageParse)
///     }
/// }
/// ```
pub trait MessageParser<M>: Send + Sync + 'static {
    /// Parse one inbound frame into one message.
    fn parse(&self, bytes: &[u8]) -> Result<M, WsError>;
}

/// Decodes every frame as JSON into any deserializable message type,
/// [`serde_json::Value`] included.
#[expect(
    clippy::exhaustive_structs,
    reason = "Unit parser is constructed by name"
)]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

impl<M: DeserializeOwned> MessageParser<M> for JsonParser {
    fn parse(&self, bytes: &[u8]) -> Result<M, WsError> {
        serde_json::from_slice(bytes).map_err(WsError::MessageParse)
    }
}
