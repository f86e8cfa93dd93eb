//! Core WebSocket infrastructure.
//!
//! This module provides a generic connection handler that protocol layers drive
//! through traits.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: background WebSocket task that emits [`TransportEvent`]s
//! - [`MessageParser`]: Trait for parsing incoming WebSocket messages
//! - [`Transport`]: Trait for the outbound half, so protocol code can run against a fake
//!
//! # Example
//!
//! ```ignore
//! let (connection, events) = ConnectionManager::connect(endpoint, &config, FrameParser);
//! connection.send(r#"{"msg":"connect"}"#.to_owned())?;
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod traits;

pub use connection::{ConnectionManager, TransportEvent};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use traits::*;
