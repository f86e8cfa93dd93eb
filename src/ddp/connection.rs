#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;

use super::dispatcher::Outlet;
use super::event::{Direction, Event, EventSink};
use super::types::request::ClientMessage;
use crate::Result;
use crate::ws::traits::Transport;

/// Lifecycle of one DDP connection.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection has been attempted
    Disconnected,
    /// The transport is opening
    Connecting,
    /// The transport is open and the handshake has been sent
    Connected {
        /// When the connection was established
        since: Instant,
    },
    /// The transport closed, or never opened. Terminal.
    Closed {
        code: Option<u16>,
        reason: Option<String>,
    },
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}

/// The DDP side of a transport: frame serialization, raw echo, connection status.
#[derive(Clone)]
pub struct Connection {
    transport: Arc<dyn Transport>,
    verbose: bool,
    events: EventSink,
    state: watch::Sender<ConnectionState>,
}

impl Connection {
    /// Wrap a transport that is still opening.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, verbose: bool, events: EventSink) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            transport,
            verbose,
            events,
            state,
        }
    }

    /// Serialize and queue a frame, echoing it first in verbose mode.
    pub fn send(&self, message: &ClientMessage) -> Result<()> {
        let text = serde_json::to_string(message)?;

        #[cfg(feature = "tracing")]
        tracing::trace!(%text, "sending DDP frame");

        if self.verbose {
            self.emit(Event::Raw {
                direction: Direction::Outbound,
                text: text.clone(),
            });
        }
        self.transport.send(text)
    }

    /// The transport opened: send the handshake, then report the connection live.
    pub fn on_open(&self, handshake: &ClientMessage) -> Result<()> {
        self.send(handshake)?;
        self.state.send_replace(ConnectionState::Connected {
            since: Instant::now(),
        });

        #[cfg(feature = "tracing")]
        tracing::debug!("DDP handshake sent");

        Ok(())
    }

    /// An inbound frame arrived, before it is decoded.
    pub fn on_message(&self, text: &str) {
        if self.verbose {
            self.emit(Event::Raw {
                direction: Direction::Inbound,
                text: text.to_owned(),
            });
        }
    }

    /// The transport closed. Only the first call has any effect.
    pub fn on_closed(&self, code: Option<u16>, reason: Option<String>) {
        let first = self.state.send_if_modified(|state| {
            if state.is_closed() {
                return false;
            }
            *state = ConnectionState::Closed {
                code,
                reason: reason.clone(),
            };
            true
        });

        if first {
            #[cfg(feature = "tracing")]
            tracing::debug!(?code, ?reason, "DDP connection closed");
            self.emit(Event::ConnectionClosed { code, reason });
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Ask the transport to close. Completion is reported through [`Self::on_closed`].
    pub fn close(&self) {
        self.transport.close();
    }
}

impl Outlet for Connection {
    fn emit(&self, event: Event) {
        self.events.send(&event);
    }

    fn reply(&self, message: &ClientMessage) -> Result<()> {
        self.send(message)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("verbose", &self.verbose)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}
