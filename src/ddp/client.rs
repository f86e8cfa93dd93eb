use std::sync::{Arc, PoisonError, RwLock};

use async_stream::stream;
use futures::Stream;
use tokio::sync::mpsc;
use url::Url;

use super::config::Config;
use super::connection::{Connection, ConnectionState};
use super::dispatcher::{Dispatcher, Outlet as _};
use super::event::{Event, EventSink};
use super::issuer::RequestIssuer;
use super::tracker::{Completion, RequestTracker};
use super::types::request::{ClientMessage, Params};
use super::types::response::{FrameParser, ServerMessage};
use crate::Result;
use crate::error::Error;
use crate::ws::error::WsError;
use crate::ws::{ConnectionManager, TransportEvent};

/// Interactive DDP client.
///
/// Holds at most one live connection. Each `connect` starts a fresh session with
/// its own [`RequestTracker`]; request ids keep counting across sessions.
///
/// `method` and `sub` return only once the server has acknowledged everything the
/// request implies. One request of each kind may be in flight at a time; a second
/// fails with [`Kind::RequestAlreadyPending`](crate::error::Kind::RequestAlreadyPending)
/// and sends nothing.
///
/// # Example
///
/// ```no_run
/// use ddp_client::ddp::{Client, Params};
///
/// # async fn run() -> ddp_client::Result<()> {
/// let client = Client::default();
/// client.connect("ws://localhost:3000/websocket").await?;
///
/// let params: Params = r#"["Alice"]"#.parse()?;
/// let completion = client.method("createUser", params).await?;
/// println!("{:?}", completion.result);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    config: Config,
    issuer: RequestIssuer,
    /// Operator events of every session
    events: EventSink,
    session: RwLock<Option<Arc<Session>>>,
}

/// One connection and the requests issued over it.
#[derive(Debug)]
struct Session {
    connection: Connection,
    tracker: Arc<RequestTracker>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Client {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                issuer: RequestIssuer::new(),
                events: EventSink::new(),
                session: RwLock::new(None),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Open a connection to `endpoint`, replacing any current one.
    ///
    /// `http` and `https` URLs are mapped to `ws` and `wss`. Resolves once the
    /// handshake has been sent, or fails with
    /// [`Kind::TransportClosed`](crate::error::Kind::TransportClosed) if the
    /// transport could not be opened.
    pub async fn connect(&self, endpoint: &str) -> Result<()> {
        let endpoint = websocket_url(endpoint)?;

        if let Some(previous) = self.replace_session(None) {
            previous.connection.close();
        }

        #[cfg(feature = "tracing")]
        tracing::info!(%endpoint, "connecting to DDP endpoint");

        let (manager, transport_events) =
            ConnectionManager::connect(endpoint, &self.inner.config.ws, FrameParser);
        let connection = Connection::new(
            Arc::new(manager),
            self.inner.config.verbose,
            self.inner.events.clone(),
        );
        let tracker = Arc::new(RequestTracker::new());
        let mut state = connection.state_receiver();

        self.replace_session(Some(Arc::new(Session {
            connection: connection.clone(),
            tracker: Arc::clone(&tracker),
        })));

        tokio::spawn(run_session(
            connection,
            tracker,
            self.inner.config.handshake(),
            transport_events,
        ));

        let settled = state
            .wait_for(|state| !matches!(state, ConnectionState::Connecting))
            .await
            .map(|state| state.clone());

        match settled {
            Ok(ConnectionState::Connected { .. }) => Ok(()),
            Ok(ConnectionState::Closed { code, reason }) => {
                Err(Error::transport_closed(code, reason))
            }
            _ => Err(Error::transport_closed(None, None)),
        }
    }

    /// Call a remote method and wait for its result and its data flush.
    pub async fn method(&self, name: &str, params: Params) -> Result<Completion> {
        let session = self.live_session()?;
        let id = self.inner.issuer.next_id();
        let pending = session.tracker.register_method(id.clone())?;

        let frame = RequestIssuer::build_method(name, params, &id);
        if let Err(e) = session.connection.send(&frame) {
            session.tracker.abandon(&pending);
            return Err(e);
        }

        session
            .tracker
            .wait_method(pending, self.inner.config.request_timeout)
            .await
    }

    /// Subscribe to a dataset and wait until its initial data is complete.
    pub async fn sub(&self, name: &str, params: Params) -> Result<Completion> {
        let session = self.live_session()?;
        let id = self.inner.issuer.next_id();
        let pending = session.tracker.register_sub(id.clone())?;

        let frame = RequestIssuer::build_sub(name, params, &id);
        if let Err(e) = session.connection.send(&frame) {
            session.tracker.abandon(&pending);
            return Err(e);
        }

        session
            .tracker
            .wait_sub(pending, self.inner.config.request_timeout)
            .await
    }

    /// Close the current connection and wait until the closure has been reported.
    pub async fn close(&self) {
        let Some(session) = self.replace_session(None) else {
            return;
        };

        let mut state = session.connection.state_receiver();
        session.connection.close();
        // An error means the session task is gone, which only happens after closing
        _ = state.wait_for(ConnectionState::is_closed).await;
    }

    /// Stream of operator events from every session of this client.
    ///
    /// Events are queued per listener without a bound, so nothing is dropped when
    /// the consumer falls behind. The stream ends once the client and all of its
    /// sessions are gone.
    pub fn events(&self) -> impl Stream<Item = Event> + use<> {
        let mut rx = self.inner.events.subscribe();

        stream! {
            while let Some(event) = rx.recv().await {
                yield event;
            }
        }
    }

    /// Raw receiver of operator events, with the same delivery as [`Self::events`].
    #[must_use]
    pub fn subscribe_events(&self) -> mpsc::UnboundedReceiver<Event> {
        self.inner.events.subscribe()
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.current_session()
            .map_or(ConnectionState::Disconnected, |session| {
                session.connection.state()
            })
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    fn current_session(&self) -> Option<Arc<Session>> {
        // The slot only ever holds a whole session, so a poisoned lock is still consistent
        self.inner
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn live_session(&self) -> Result<Arc<Session>> {
        self.current_session()
            .filter(|session| session.connection.is_connected())
            .ok_or_else(Error::not_connected)
    }

    fn replace_session(&self, session: Option<Arc<Session>>) -> Option<Arc<Session>> {
        let mut slot = self
            .inner
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, session)
    }
}

/// Drain one transport until it closes, feeding frames through the dispatcher.
async fn run_session(
    connection: Connection,
    tracker: Arc<RequestTracker>,
    handshake: ClientMessage,
    mut transport_events: mpsc::UnboundedReceiver<TransportEvent<ServerMessage>>,
) {
    let dispatcher = Dispatcher::new(Arc::clone(&tracker));
    let mut closure = (None, Some(WsError::ConnectionClosed.to_string()));

    while let Some(event) = transport_events.recv().await {
        match event {
            TransportEvent::Opened => {
                if let Err(e) = connection.on_open(&handshake) {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%e, "failed to send the DDP handshake");
                    #[cfg(not(feature = "tracing"))]
                    let _: &Error = &e;
                    connection.close();
                }
            }
            TransportEvent::Message { text, parsed } => {
                connection.on_message(&text);
                match parsed {
                    Ok(frames) => {
                        for frame in frames {
                            dispatcher.handle(frame, &connection);
                        }
                    }
                    Err(e) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(%e, %text, "failed to decode DDP frame");
                        connection.emit(Event::DecodeFailed {
                            text,
                            reason: e.to_string(),
                        });
                    }
                }
            }
            TransportEvent::Closed { code, reason } => {
                closure = (code, reason);
                break;
            }
        }
    }

    let (code, reason) = closure;
    connection.on_closed(code, reason.clone());
    tracker.close(code, reason);
}

/// Parse `endpoint`, mapping `http(s)` to `ws(s)`.
fn websocket_url(endpoint: &str) -> Result<Url> {
    let mut url = Url::parse(endpoint.trim())?;

    let scheme = match url.scheme() {
        "ws" | "wss" => return Ok(url),
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(Error::validation(format!(
                "unsupported endpoint scheme `{other}`, expected ws, wss, http or https"
            )));
        }
    };

    url.set_scheme(scheme)
        .map_err(|()| Error::validation(format!("cannot use {scheme} for {endpoint}")))?;
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Kind;

    #[test]
    fn http_endpoints_map_to_websocket_schemes() {
        assert_eq!(
            websocket_url("http://foo.meteor.com/sockjs/websocket")
                .unwrap()
                .as_str(),
            "ws://foo.meteor.com/sockjs/websocket"
        );
        assert_eq!(
            websocket_url("https://example.com/websocket").unwrap().scheme(),
            "wss"
        );
        assert_eq!(
            websocket_url(" ws://localhost:3000/websocket ").unwrap().port(),
            Some(3000)
        );
    }

    #[test]
    fn bad_endpoints_are_rejected() {
        assert_eq!(websocket_url("not a url").unwrap_err().kind(), Kind::Validation);
        assert_eq!(
            websocket_url("ftp://example.com").unwrap_err().kind(),
            Kind::Validation
        );
    }

    #[tokio::test]
    async fn requests_without_a_connection_fail() {
        let client = Client::default();

        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        let err = client.method("createUser", Params::default()).await.unwrap_err();
        assert_eq!(err.kind(), Kind::NotConnected);
        let err = client.sub("userList", Params::default()).await.unwrap_err();
        assert_eq!(err.kind(), Kind::NotConnected);
    }

    #[tokio::test]
    async fn close_without_a_connection_is_a_no_op() {
        let client = Client::default();
        client.close().await;
        assert!(!client.is_connected());
    }
}
