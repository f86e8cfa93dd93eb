use serde::Deserialize;
use serde_json::{Map, Value};
use serde_with::serde_as;

use crate::serde_helpers::{StringFromAny, deserialize_with_warnings};
use crate::ws::traits::MessageParser;

/// Field name → value map carried by `data`, `added` and `changed` frames.
pub type Fields = Map<String, Value>;

/// Frames a DDP server sends, discriminated by their `msg` field.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ServerMessage {
    /// The handshake was accepted
    Connected(Connected),
    /// The handshake was rejected; the server proposes a version
    Failed(Failed),
    /// Return value (or error) of a method call
    Result(MethodResult),
    /// All writes of the listed methods have been reflected in data messages
    Updated(Updated),
    /// Combined document update and flush notification
    Data(DataMessage),
    /// A document entered a subscribed collection
    Added(Added),
    /// Fields of a document changed
    Changed(Changed),
    /// A document left a subscribed collection
    Removed(Removed),
    /// Initial data of the listed subs has been sent
    Ready(Ready),
    /// A sub was stopped or refused
    Nosub(NoSub),
    /// The server could not process a client frame
    Error(ErrorMessage),
    Ping(Heartbeat),
    Pong(Heartbeat),
    /// Any other `msg`, or a frame without one
    #[serde(other)]
    Unknown,
}

#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Connected {
    #[serde(default)]
    pub session: Option<String>,
}

#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Failed {
    #[serde(default)]
    pub version: Option<String>,
}

#[serde_as]
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MethodResult {
    #[serde_as(as = "StringFromAny")]
    pub id: String,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[serde_as]
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Updated {
    #[serde_as(as = "Vec<StringFromAny>")]
    #[serde(default)]
    pub methods: Vec<String>,
}

/// Legacy combined frame: optional document update plus optional flush lists.
#[serde_as]
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DataMessage {
    #[serde(default)]
    pub collection: Option<String>,
    #[serde_as(as = "Option<StringFromAny>")]
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub set: Option<Fields>,
    #[serde(default)]
    pub unset: Option<Vec<String>>,
    #[serde_as(as = "Option<Vec<StringFromAny>>")]
    #[serde(default)]
    pub methods: Option<Vec<String>>,
    #[serde_as(as = "Option<Vec<StringFromAny>>")]
    #[serde(default)]
    pub subs: Option<Vec<String>>,
}

#[serde_as]
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Added {
    pub collection: String,
    #[serde_as(as = "StringFromAny")]
    pub id: String,
    #[serde(default)]
    pub fields: Option<Fields>,
}

#[serde_as]
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Changed {
    pub collection: String,
    #[serde_as(as = "StringFromAny")]
    pub id: String,
    #[serde(default)]
    pub fields: Option<Fields>,
    #[serde(default)]
    pub cleared: Option<Vec<String>>,
}

#[serde_as]
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Removed {
    pub collection: String,
    #[serde_as(as = "StringFromAny")]
    pub id: String,
}

#[serde_as]
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Ready {
    #[serde_as(as = "Vec<StringFromAny>")]
    #[serde(default)]
    pub subs: Vec<String>,
}

#[serde_as]
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NoSub {
    #[serde_as(as = "StringFromAny")]
    pub id: String,
    #[serde(default)]
    pub error: Option<Value>,
}

#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ErrorMessage {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(rename = "offendingMessage", default)]
    pub offending_message: Option<Value>,
}

impl ErrorMessage {
    /// Id of the client frame this error refers to, if the server echoed it.
    #[must_use]
    pub fn correlated_id(&self) -> Option<String> {
        match self.offending_message.as_ref()?.get("id")? {
            Value::String(id) => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }

    /// The error as a single JSON value, for reporting.
    #[must_use]
    pub fn payload(&self) -> Value {
        let mut payload = Map::new();
        if let Some(reason) = &self.reason {
            payload.insert("reason".to_owned(), Value::String(reason.clone()));
        }
        if let Some(offending) = &self.offending_message {
            payload.insert("offendingMessage".to_owned(), offending.clone());
        }
        Value::Object(payload)
    }
}

#[serde_as]
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Heartbeat {
    #[serde_as(as = "Option<StringFromAny>")]
    #[serde(default)]
    pub id: Option<String>,
}

/// [`MessageParser`] for DDP text frames.
#[non_exhaustive]
#[derive(Clone, Debug, Default)]
pub struct FrameParser;

impl MessageParser<ServerMessage> for FrameParser {
    fn parse(&self, bytes: &[u8]) -> crate::Result<Vec<ServerMessage>> {
        parse_frames(bytes)
    }
}

/// Decode one text frame.
///
/// Returns an empty vector for empty or whitespace-only input (keepalive blanks).
/// Objects without a `msg` field, such as the SockJS `{"server_id":"0"}` greeting,
/// decode as [`ServerMessage::Unknown`]. Anything that is not a JSON object fails.
pub fn parse_frames(bytes: &[u8]) -> crate::Result<Vec<ServerMessage>> {
    let trimmed = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map_or(&[][..], |start| &bytes[start..]);

    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let value: Value = serde_json::from_slice(trimmed)?;
    match &value {
        Value::Object(map) if !map.contains_key("msg") => Ok(vec![ServerMessage::Unknown]),
        Value::Object(_) => Ok(vec![deserialize_with_warnings(value)?]),
        _ => Err(crate::error::Error::validation(format!(
            "DDP frame must be a JSON object, got {value}"
        ))),
    }
}
