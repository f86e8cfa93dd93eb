use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use strum_macros::Display;
use tokio::sync::mpsc;

/// Which way a raw frame travelled.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Direction {
    #[strum(serialize = ">>")]
    Outbound,
    #[strum(serialize = "<<")]
    Inbound,
}

/// Operator-visible output of a session.
///
/// `Display` renders each event as one line, the format the `ddpclient` binary prints.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Exact text of a frame, emitted only in verbose mode
    Raw { direction: Direction, text: String },
    Connected { session: Option<String> },
    /// The server refused the handshake
    HandshakeFailed { version: Option<String> },
    ConnectionClosed {
        code: Option<u16>,
        reason: Option<String>,
    },
    MethodResult {
        id: String,
        result: Option<Value>,
        error: Option<Value>,
    },
    /// A field was set on a document
    Upsert {
        collection: String,
        id: String,
        key: String,
        value: Value,
    },
    /// A field was removed from a document
    Delete {
        collection: String,
        id: String,
        key: String,
    },
    DocumentRemoved { collection: String, id: String },
    SubscriptionComplete { id: String },
    SubscriptionStopped { id: String, error: Option<Value> },
    ServerError {
        reason: Option<String>,
        offending_message: Option<Value>,
    },
    /// An inbound frame could not be decoded
    DecodeFailed { text: String, reason: String },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw { direction, text } => write!(f, "[RAW] {direction} {text}"),
            Self::Connected { .. } => write!(f, "* CONNECTED"),
            Self::HandshakeFailed { version } => match version {
                Some(version) => write!(f, "* CONNECT FAILED, server proposes version {version}"),
                None => write!(f, "* CONNECT FAILED"),
            },
            Self::ConnectionClosed { code, reason } => {
                write!(f, "* CONNECTION CLOSED")?;
                if let Some(code) = code {
                    write!(f, " {code}")?;
                }
                if let Some(reason) = reason {
                    write!(f, " {reason}")?;
                }
                Ok(())
            }
            Self::MethodResult {
                error: Some(error), ..
            } => write!(f, "* METHOD ERROR {error}"),
            Self::MethodResult { result, .. } => match result {
                Some(result) => write!(f, "* METHOD RESULT {result}"),
                None => write!(f, "* METHOD RESULT"),
            },
            Self::Upsert {
                collection,
                id,
                key,
                value,
            } => write!(f, "* SET {collection} {id} {key} {value}"),
            Self::Delete {
                collection,
                id,
                key,
            } => write!(f, "* UNSET {collection} {id} {key}"),
            Self::DocumentRemoved { collection, id } => write!(f, "* REMOVED {collection} {id}"),
            Self::SubscriptionComplete { .. } => write!(f, "* SUB COMPLETE"),
            Self::SubscriptionStopped { id, error } => match error {
                Some(error) => write!(f, "* NOSUB {id} {error}"),
                None => write!(f, "* NOSUB {id}"),
            },
            Self::ServerError {
                reason,
                offending_message,
            } => {
                write!(f, "* ERROR {}", reason.as_deref().unwrap_or("(no reason)"))?;
                if let Some(offending) = offending_message {
                    write!(f, " {offending}")?;
                }
                Ok(())
            }
            Self::DecodeFailed { text, reason } => {
                write!(f, "* MALFORMED FRAME ({reason}) {text}")
            }
        }
    }
}

/// Fans operator events out to every listener.
///
/// Each listener owns an unbounded queue, so a slow reader never loses events and
/// never holds up the session. Listeners whose receiver was dropped are pruned on
/// the next send.
#[derive(Clone, Debug, Default)]
pub struct EventSink {
    listeners: Arc<Mutex<Vec<mpsc::UnboundedSender<Event>>>>,
}

impl EventSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener that receives every event sent from now on.
    #[must_use]
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    pub fn send(&self, event: &Event) {
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<Event>>> {
        // Pushing or retaining senders cannot leave the list half-updated
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
