use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;

use crate::error::Error;

/// Frames the client sends to a DDP server.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Opening handshake. Without a `version` this is exactly `{"msg":"connect"}`.
    Connect {
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        support: Option<Vec<String>>,
    },
    /// Remote procedure call
    Method {
        method: String,
        params: Params,
        id: String,
    },
    /// Subscription to a published dataset
    Sub {
        name: String,
        params: Params,
        id: String,
    },
    /// Answer to a server `ping`
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

impl ClientMessage {
    /// The bare handshake, with no protocol version negotiation.
    #[must_use]
    pub const fn connect() -> Self {
        Self::Connect {
            version: None,
            support: None,
        }
    }
}

/// Positional parameters of a method or sub. Always a JSON array on the wire.
///
/// Parsing from text rejects anything that is not an array with
/// [`Kind::InvalidParameters`](crate::error::Kind::InvalidParameters).
///
/// ```
/// use ddp_client::ddp::Params;
///
/// let params: Params = r#"[{"name": "foo"}, 2]"#.parse().unwrap();
/// assert_eq!(params.len(), 2);
/// assert!("{\"name\": \"foo\"}".parse::<Params>().is_err());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Params(Vec<Value>);

impl Params {
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<Value> {
        self.0
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl TryFrom<Value> for Params {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Array(values) => Ok(Self(values)),
            other => Err(Error::invalid_parameters(format!(
                "expected an array, got {other}"
            ))),
        }
    }
}

impl FromStr for Params {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: Value = serde_json::from_str(s.trim())
            .map_err(|e| Error::invalid_parameters(e.to_string()))?;
        Self::try_from(value)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::Kind;

    #[test]
    fn bare_handshake_is_only_the_msg_field() {
        let json = serde_json::to_string(&ClientMessage::connect()).unwrap();
        assert_eq!(json, r#"{"msg":"connect"}"#);
    }

    #[test]
    fn versioned_handshake_lists_support() {
        let frame = ClientMessage::Connect {
            version: Some("1".to_owned()),
            support: Some(vec!["1".to_owned(), "pre2".to_owned()]),
        };

        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"msg":"connect","version":"1","support":["1","pre2"]}"#);
    }

    #[test]
    fn method_frame_keeps_wire_field_order() {
        let frame = ClientMessage::Method {
            method: "createUser".to_owned(),
            params: Params::new(vec![json!("Alice")]),
            id: "1".to_owned(),
        };

        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(
            json,
            r#"{"msg":"method","method":"createUser","params":["Alice"],"id":"1"}"#
        );
    }

    #[test]
    fn sub_frame_serializes_empty_params_as_array() {
        let frame = ClientMessage::Sub {
            name: "userList".to_owned(),
            params: Params::default(),
            id: "2".to_owned(),
        };

        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            json,
            json!({"msg": "sub", "name": "userList", "params": [], "id": "2"})
        );
    }

    #[test]
    fn pong_echoes_optional_id() {
        let with_id = serde_json::to_string(&ClientMessage::Pong {
            id: Some("p1".to_owned()),
        })
        .unwrap();
        let without_id = serde_json::to_string(&ClientMessage::Pong { id: None }).unwrap();

        assert_eq!(with_id, r#"{"msg":"pong","id":"p1"}"#);
        assert_eq!(without_id, r#"{"msg":"pong"}"#);
    }

    #[test]
    fn params_parse_accepts_arrays_with_surrounding_whitespace() {
        let params: Params = "  [\"foo.meteor.com\"] ".parse().unwrap();
        assert_eq!(params.into_inner(), vec![json!("foo.meteor.com")]);
    }

    #[test]
    fn params_parse_rejects_non_arrays() {
        for text in ["{\"a\": 1}", "42", "", "[1,"] {
            let err = text.parse::<Params>().unwrap_err();
            assert_eq!(err.kind(), Kind::InvalidParameters, "input {text:?}");
        }
    }
}
