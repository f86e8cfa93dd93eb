//! Routes decoded server frames to tracker transitions and operator events.

use std::sync::Arc;

use serde_json::{Value, json};

use super::event::Event;
use super::tracker::RequestTracker;
use super::types::request::ClientMessage;
use super::types::response::{
    Added, Changed, DataMessage, ErrorMessage, Fields, MethodResult, NoSub, ServerMessage,
};
use crate::Result;

/// Where the dispatcher sends what it produces.
pub trait Outlet: Send + Sync {
    /// Publish an operator event.
    fn emit(&self, event: Event);

    /// Send a frame back to the server.
    fn reply(&self, message: &ClientMessage) -> Result<()>;
}

/// Stateless router over a shared [`RequestTracker`].
///
/// Effects reach the [`Outlet`] in frame order. Document events carried by a frame
/// are emitted before the same frame releases any waiter.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    tracker: Arc<RequestTracker>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(tracker: Arc<RequestTracker>) -> Self {
        Self { tracker }
    }

    pub fn handle<O: Outlet + ?Sized>(&self, frame: ServerMessage, outlet: &O) {
        match frame {
            ServerMessage::Connected(connected) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(session = ?connected.session, "DDP session established");
                outlet.emit(Event::Connected {
                    session: connected.session,
                });
            }
            ServerMessage::Failed(failed) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(version = ?failed.version, "server refused the handshake");
                outlet.emit(Event::HandshakeFailed {
                    version: failed.version,
                });
            }
            ServerMessage::Result(result) => self.on_result(result, outlet),
            ServerMessage::Updated(updated) => self.flush_methods(&updated.methods),
            ServerMessage::Data(data) => self.on_data(data, outlet),
            ServerMessage::Added(Added {
                collection,
                id,
                fields,
            }) => emit_fields(&collection, &id, fields, outlet),
            ServerMessage::Changed(Changed {
                collection,
                id,
                fields,
                cleared,
            }) => {
                emit_fields(&collection, &id, fields, outlet);
                emit_cleared(&collection, &id, cleared.unwrap_or_default(), outlet);
            }
            ServerMessage::Removed(removed) => outlet.emit(Event::DocumentRemoved {
                collection: removed.collection,
                id: removed.id,
            }),
            ServerMessage::Ready(ready) => self.flush_subs(&ready.subs, outlet),
            ServerMessage::Nosub(nosub) => self.on_nosub(nosub, outlet),
            ServerMessage::Error(error) => self.on_error(error, outlet),
            ServerMessage::Ping(ping) => {
                let pong = ClientMessage::Pong { id: ping.id };
                if let Err(e) = outlet.reply(&pong) {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%e, "failed to answer ping");
                    #[cfg(not(feature = "tracing"))]
                    let _: &crate::error::Error = &e;
                }
            }
            ServerMessage::Pong(_) => {
                #[cfg(feature = "tracing")]
                tracing::trace!("pong");
            }
            ServerMessage::Unknown => {
                #[cfg(feature = "tracing")]
                tracing::debug!("ignoring frame with unknown msg");
            }
        }
    }

    fn on_result<O: Outlet + ?Sized>(&self, result: MethodResult, outlet: &O) {
        let MethodResult { id, result, error } = result;
        if self.tracker.pending_method().as_deref() != Some(id.as_str()) {
            #[cfg(feature = "tracing")]
            tracing::debug!(%id, "ignoring result for a method that is not pending");
            return;
        }

        outlet.emit(Event::MethodResult {
            id: id.clone(),
            result: result.clone(),
            error: error.clone(),
        });
        self.tracker.ack_method_result(&id, result, error);
    }

    fn on_data<O: Outlet + ?Sized>(&self, data: DataMessage, outlet: &O) {
        let DataMessage {
            collection,
            id,
            set,
            unset,
            methods,
            subs,
        } = data;

        if let (Some(collection), Some(id)) = (&collection, &id) {
            emit_fields(collection, id, set, outlet);
            emit_cleared(collection, id, unset.unwrap_or_default(), outlet);
        } else if set.is_some() || unset.is_some() {
            #[cfg(feature = "tracing")]
            tracing::debug!("data frame carries fields without a collection and id");
        }

        if let Some(methods) = methods {
            self.flush_methods(&methods);
        }
        if let Some(subs) = subs {
            self.flush_subs(&subs, outlet);
        }
    }

    fn flush_methods(&self, methods: &[String]) {
        for id in methods {
            self.tracker.ack_method_data(id);
        }
    }

    fn flush_subs<O: Outlet + ?Sized>(&self, subs: &[String], outlet: &O) {
        for id in subs {
            if self.tracker.ack_sub_data(id) {
                outlet.emit(Event::SubscriptionComplete { id: id.clone() });
            }
        }
    }

    fn on_nosub<O: Outlet + ?Sized>(&self, nosub: NoSub, outlet: &O) {
        let NoSub { id, error } = nosub;
        let payload = error
            .clone()
            .unwrap_or_else(|| json!({ "reason": "subscription stopped", "id": id }));

        outlet.emit(Event::SubscriptionStopped {
            id: id.clone(),
            error,
        });
        if self.tracker.pending_sub().as_deref() == Some(id.as_str()) {
            self.tracker.fail(&id, payload);
        }
    }

    fn on_error<O: Outlet + ?Sized>(&self, error: ErrorMessage, outlet: &O) {
        #[cfg(feature = "tracing")]
        tracing::warn!(reason = ?error.reason, "server reported an error");

        let correlated = error.correlated_id().map(|id| (id, error.payload()));
        outlet.emit(Event::ServerError {
            reason: error.reason,
            offending_message: error.offending_message,
        });
        if let Some((id, payload)) = correlated {
            self.tracker.fail(&id, payload);
        }
    }
}

fn emit_fields<O: Outlet + ?Sized>(collection: &str, id: &str, fields: Option<Fields>, outlet: &O) {
    for (key, value) in fields.unwrap_or_default() {
        outlet.emit(upsert(collection, id, key, value));
    }
}

fn emit_cleared<O: Outlet + ?Sized>(collection: &str, id: &str, keys: Vec<String>, outlet: &O) {
    for key in keys {
        outlet.emit(Event::Delete {
            collection: collection.to_owned(),
            id: id.to_owned(),
            key,
        });
    }
}

fn upsert(collection: &str, id: &str, key: String, value: Value) -> Event {
    Event::Upsert {
        collection: collection.to_owned(),
        id: id.to_owned(),
        key,
        value,
    }
}
