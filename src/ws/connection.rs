#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use futures::{SinkExt as _, StreamExt as _};
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::config::Config;
use super::error::WsError;
use super::traits::{MessageParser, Transport};
use crate::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the client itself ends the session.
const NORMAL_CLOSURE: u16 = 1000;

/// Lifecycle notifications delivered by a transport, in arrival order.
#[non_exhaustive]
#[derive(Debug)]
pub enum TransportEvent<M> {
    /// The opening handshake completed
    Opened,
    /// A text frame arrived
    Message {
        /// Exact text received on the wire
        text: String,
        /// Result of running the frame through the [`MessageParser`]
        parsed: Result<Vec<M>>,
    },
    /// The connection ended, or could not be established. Always the last event.
    Closed {
        code: Option<u16>,
        reason: Option<String>,
    },
}

/// Manages a single WebSocket connection.
///
/// The connection runs in a background task that:
/// - Opens the socket, bounded by [`Config::connect_timeout`]
/// - Forwards queued outbound text frames
/// - Parses inbound text frames and forwards them as [`TransportEvent`]s
/// - Sends a close frame when [`Transport::close`] is called
///
/// There is no reconnection: once `Closed` has been emitted the manager is spent.
///
/// # Example
///
/// ```ignore
/// let (connection, mut events) = ConnectionManager::connect(endpoint, &config, FrameParser);
///
/// while let Some(event) = events.recv().await {
///     println!("Received: {event:?}");
/// }
/// ```
#[derive(Clone, Debug)]
pub struct ConnectionManager {
    /// Sender channel for outgoing messages
    sender_tx: mpsc::UnboundedSender<String>,
    /// Cancelled to request an orderly shutdown
    cancel: CancellationToken,
}

impl ConnectionManager {
    /// Start connecting to `endpoint` in a background task.
    ///
    /// Returns the manager together with the receiving end of its event stream.
    /// The `parser` is used to deserialize incoming WebSocket messages.
    pub fn connect<M, P>(
        endpoint: Url,
        config: &Config,
        parser: P,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent<M>>)
    where
        M: DeserializeOwned + Send + 'static,
        P: MessageParser<M>,
    {
        let (sender_tx, sender_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let connection_config = config.clone();
        let connection_cancel = cancel.clone();

        tokio::spawn(async move {
            Self::connection_task(
                endpoint,
                connection_config,
                sender_rx,
                events_tx,
                parser,
                connection_cancel,
            )
            .await;
        });

        (Self { sender_tx, cancel }, events_rx)
    }

    /// Open the socket, run it until it closes, then report the closure.
    async fn connection_task<M, P>(
        endpoint: Url,
        config: Config,
        mut sender_rx: mpsc::UnboundedReceiver<String>,
        events_tx: mpsc::UnboundedSender<TransportEvent<M>>,
        parser: P,
        cancel: CancellationToken,
    ) where
        M: DeserializeOwned + Send + 'static,
        P: MessageParser<M>,
    {
        #[cfg(feature = "tracing")]
        tracing::debug!(%endpoint, "Opening WebSocket connection");

        let attempt = tokio::select! {
            () = cancel.cancelled() => {
                _ = events_tx.send(TransportEvent::Closed {
                    code: None,
                    reason: Some("cancelled before the connection opened".to_owned()),
                });
                return;
            }
            attempt = timeout(config.connect_timeout, connect_async(endpoint.as_str())) => attempt,
        };

        let ws_stream = match attempt {
            Ok(Ok((ws_stream, _))) => ws_stream,
            Ok(Err(e)) => {
                let error = WsError::Connection(e);
                #[cfg(feature = "tracing")]
                tracing::warn!("Unable to connect: {error}");
                _ = events_tx.send(TransportEvent::Closed {
                    code: None,
                    reason: Some(error.to_string()),
                });
                return;
            }
            Err(_elapsed) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Unable to connect within {:?}",
                    config.connect_timeout
                );
                _ = events_tx.send(TransportEvent::Closed {
                    code: None,
                    reason: Some(WsError::Timeout.to_string()),
                });
                return;
            }
        };

        _ = events_tx.send(TransportEvent::Opened);

        let (code, reason) =
            Self::handle_connection(ws_stream, &mut sender_rx, &events_tx, &parser, &cancel).await;

        #[cfg(feature = "tracing")]
        tracing::debug!(?code, ?reason, "WebSocket connection closed");

        _ = events_tx.send(TransportEvent::Closed { code, reason });
    }

    /// Pump an open WebSocket until either side closes it.
    ///
    /// Returns the close code and reason to report.
    async fn handle_connection<M, P>(
        ws_stream: WsStream,
        sender_rx: &mut mpsc::UnboundedReceiver<String>,
        events_tx: &mpsc::UnboundedSender<TransportEvent<M>>,
        parser: &P,
        cancel: &CancellationToken,
    ) -> (Option<u16>, Option<String>)
    where
        M: DeserializeOwned + Send + 'static,
        P: MessageParser<M>,
    {
        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                // Handle incoming messages
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            #[cfg(feature = "tracing")]
                            tracing::trace!(%text, "Received WebSocket text message");

                            let parsed = parser.parse(text.as_bytes());
                            let event = TransportEvent::Message {
                                text: text.as_str().to_owned(),
                                parsed,
                            };
                            if events_tx.send(event).is_err() {
                                // Nobody is listening anymore
                                _ = write.send(Message::Close(None)).await;
                                return (Some(NORMAL_CLOSURE), None);
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return frame.map_or((None, None), |frame| {
                                let reason = frame.reason.as_str();
                                (
                                    Some(u16::from(frame.code)),
                                    (!reason.is_empty()).then(|| reason.to_owned()),
                                )
                            });
                        }
                        Some(Ok(_)) => {
                            // Binary frames carry nothing for text protocols; PING/PONG
                            // control frames are answered by tungstenite itself.
                        }
                        Some(Err(e)) => {
                            return (None, Some(WsError::Connection(e).to_string()));
                        }
                        None => {
                            return (None, Some(WsError::ConnectionClosed.to_string()));
                        }
                    }
                }

                // Handle outgoing messages
                Some(text) = sender_rx.recv() => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        return (None, Some(WsError::Connection(e).to_string()));
                    }
                }

                () = cancel.cancelled() => {
                    _ = write.send(Message::Close(None)).await;
                    return (Some(NORMAL_CLOSURE), Some("closed by client".to_owned()));
                }
            }
        }
    }
}

impl Transport for ConnectionManager {
    fn send(&self, text: String) -> Result<()> {
        self.sender_tx
            .send(text)
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}
