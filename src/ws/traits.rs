//! Core traits for generic WebSocket infrastructure.

use serde::de::DeserializeOwned;

/// Message parser trait for converting raw bytes to messages.
///
/// The transport hands every text frame to the parser and forwards whatever
/// comes back, so protocol layers decide framing rules (single object, arrays,
/// keepalive blanks) without the transport knowing about them.
///
/// # Example
///
/// ```ignore
/// pub struct SimpleParser;
///
/// impl MessageParser<MyMessage> for SimpleParser {
///     fn parse(&self, bytes: &[u8]) -> crate::Result<Vec<MyMessage>> {
///         let msg: MyMessage = serde_json::from_slice(bytes)?;
///         Ok(vec![msg])
///     }
/// }
/// ```
pub trait MessageParser<M: DeserializeOwned>: Send + Sync + 'static {
    /// Parse incoming bytes into messages.
    ///
    /// May return an empty vec for frames that carry nothing of interest.
    fn parse(&self, bytes: &[u8]) -> crate::Result<Vec<M>>;
}

/// Outbound half of a message transport.
///
/// Inbound traffic arrives separately as [`TransportEvent`](super::connection::TransportEvent)s,
/// so a protocol layer can be driven by a real socket or by a scripted channel.
pub trait Transport: Send + Sync + 'static {
    /// Queue a text frame for transmission.
    fn send(&self, text: String) -> crate::Result<()>;

    /// Start an orderly shutdown. The event stream ends with a `Closed` event.
    fn close(&self);
}
