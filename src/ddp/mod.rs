//! DDP (Distributed Data Protocol) client.
//!
//! # Architecture
//!
//! - [`Client`]: owns the request id counter and the current session
//! - [`connection::Connection`]: DDP framing over a [`Transport`](crate::ws::Transport)
//! - [`dispatcher::Dispatcher`]: routes server frames to the tracker and to [`Event`]s
//! - [`tracker::RequestTracker`]: dual-acknowledgment state machine for methods and subs
//!
//! A method completes once the server has sent its `result` and flushed its writes.
//! A sub completes once its initial data is ready.

pub mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod event;
pub mod issuer;
pub mod tracker;
pub mod types;

pub use client::Client;
pub use config::Config;
pub use connection::ConnectionState;
pub use event::{Direction, Event, EventSink};
pub use issuer::{RequestId, RequestIssuer};
pub use tracker::{Completion, RequestKind};
pub use types::request::{ClientMessage, Params};
pub use types::response::ServerMessage;
