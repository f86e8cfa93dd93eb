use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use serde_json::Value;

use crate::ddp::RequestKind;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// A command was issued with no live connection
    NotConnected,
    /// Request parameters could not be decoded into a JSON array
    InvalidParameters,
    /// A request of the same kind is still awaiting its acknowledgments
    RequestAlreadyPending,
    /// The server answered a pending request with an error
    ServerError,
    /// A pending request did not complete within the configured timeout
    RequestTimedOut,
    /// The transport closed, or never opened
    TransportClosed,
    /// Error related to invalid input within ddp-client
    Validation,
    /// Internal error from dependencies
    Internal,
    /// Error related to WebSocket connections
    WebSocket,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Validation {
            reason: message.into(),
        }
        .into()
    }

    pub fn invalid_parameters<S: Into<String>>(message: S) -> Self {
        InvalidParameters {
            reason: message.into(),
        }
        .into()
    }

    #[must_use]
    pub fn not_connected() -> Self {
        NotConnected.into()
    }

    #[must_use]
    pub fn already_pending(kind: RequestKind, id: String) -> Self {
        RequestAlreadyPending { kind, id }.into()
    }

    #[must_use]
    pub fn server(id: Option<String>, payload: Value) -> Self {
        ServerError { id, payload }.into()
    }

    #[must_use]
    pub fn timed_out(id: String, after: Duration) -> Self {
        RequestTimedOut { id, after }.into()
    }

    #[must_use]
    pub fn transport_closed(code: Option<u16>, reason: Option<String>) -> Self {
        TransportClosed { code, reason }.into()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct Validation {
    pub reason: String,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid: {}", self.reason)
    }
}

impl StdError for Validation {}

#[non_exhaustive]
#[derive(Debug)]
pub struct InvalidParameters {
    pub reason: String,
}

impl fmt::Display for InvalidParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parameters must be a JSON array: {}", self.reason)
    }
}

impl StdError for InvalidParameters {}

#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct NotConnected;

impl fmt::Display for NotConnected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection closed, use `connect` to establish one")
    }
}

impl StdError for NotConnected {}

/// A `method` or `sub` was issued while another of the same kind was still in flight.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct RequestAlreadyPending {
    pub kind: RequestKind,
    /// Id of the request that is still pending
    pub id: String,
}

impl fmt::Display for RequestAlreadyPending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} is still awaiting acknowledgment", self.kind, self.id)
    }
}

impl StdError for RequestAlreadyPending {}

/// Error payload the server sent for a pending request.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ServerError {
    /// Id of the failed request, when the server correlated it
    pub id: Option<String>,
    pub payload: Value,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "server rejected request {id}: {}", self.payload),
            None => write!(f, "server error: {}", self.payload),
        }
    }
}

impl StdError for ServerError {}

#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct RequestTimedOut {
    pub id: String,
    pub after: Duration,
}

impl fmt::Display for RequestTimedOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request {} timed out after {:?}", self.id, self.after)
    }
}

impl StdError for RequestTimedOut {}

/// The connection closed while a request was outstanding, or failed to open.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportClosed {
    pub code: Option<u16>,
    pub reason: Option<String>,
}

impl fmt::Display for TransportClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport closed")?;
        if let Some(code) = self.code {
            write!(f, " with code {code}")?;
        }
        if let Some(reason) = &self.reason {
            write!(f, ": {reason}")?;
        }
        Ok(())
    }
}

impl StdError for TransportClosed {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::with_source(Kind::Validation, e)
    }
}

impl From<Validation> for Error {
    fn from(err: Validation) -> Self {
        Error::with_source(Kind::Validation, err)
    }
}

impl From<InvalidParameters> for Error {
    fn from(err: InvalidParameters) -> Self {
        Error::with_source(Kind::InvalidParameters, err)
    }
}

impl From<NotConnected> for Error {
    fn from(err: NotConnected) -> Self {
        Error::with_source(Kind::NotConnected, err)
    }
}

impl From<RequestAlreadyPending> for Error {
    fn from(err: RequestAlreadyPending) -> Self {
        Error::with_source(Kind::RequestAlreadyPending, err)
    }
}

impl From<ServerError> for Error {
    fn from(err: ServerError) -> Self {
        Error::with_source(Kind::ServerError, err)
    }
}

impl From<RequestTimedOut> for Error {
    fn from(err: RequestTimedOut) -> Self {
        Error::with_source(Kind::RequestTimedOut, err)
    }
}

impl From<TransportClosed> for Error {
    fn from(err: TransportClosed) -> Self {
        Error::with_source(Kind::TransportClosed, err)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn transport_closed_display_should_include_code_and_reason() {
        let closed = TransportClosed {
            code: Some(1006),
            reason: Some("abnormal".to_owned()),
        };

        assert_eq!(
            closed.to_string(),
            "transport closed with code 1006: abnormal"
        );
        assert_eq!(
            TransportClosed {
                code: None,
                reason: None
            }
            .to_string(),
            "transport closed"
        );
    }

    #[test]
    fn server_error_into_error_should_keep_payload() {
        let error = Error::server(Some("3".to_owned()), json!({"error": 404}));

        assert_eq!(error.kind(), Kind::ServerError);
        let inner = error.downcast_ref::<ServerError>().unwrap();
        assert_eq!(inner.id.as_deref(), Some("3"));
        assert_eq!(inner.payload, json!({"error": 404}));
    }

    #[test]
    fn already_pending_display_names_the_kind() {
        let error = Error::already_pending(RequestKind::Method, "1".to_owned());

        assert_eq!(error.kind(), Kind::RequestAlreadyPending);
        assert!(error.to_string().contains("method 1"), "got {error}");
    }

    #[test]
    fn url_errors_are_validation_errors() {
        let error: Error = url::Url::parse("not a url").unwrap_err().into();
        assert_eq!(error.kind(), Kind::Validation);
    }
}
