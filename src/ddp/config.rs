use std::time::Duration;

use bon::Builder;

use super::types::request::ClientMessage;
use crate::ws::config::Config as TransportConfig;

/// Configuration for [`Client`](super::Client)
#[non_exhaustive]
#[derive(Clone, Debug, Default, Builder)]
pub struct Config {
    /// Echo every raw frame as an [`Event::Raw`](super::Event::Raw).
    #[builder(default)]
    pub verbose: bool,
    /// How long `method` and `sub` wait for their acknowledgments. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
    /// DDP protocol version announced in the handshake
    #[builder(into)]
    pub version: Option<String>,
    /// Protocol versions the client supports, announced in the handshake.
    /// Defaults to `[version]` when only `version` is set.
    pub support: Option<Vec<String>>,
    #[builder(default)]
    pub ws: TransportConfig,
}

impl Config {
    /// The `connect` frame sent once the transport opens.
    ///
    /// Servers reject a `version` that comes without `support`, so a lone version
    /// is also announced as the only supported one.
    #[must_use]
    pub fn handshake(&self) -> ClientMessage {
        match (&self.version, &self.support) {
            (None, None) => ClientMessage::connect(),
            (Some(version), None) => ClientMessage::Connect {
                version: Some(version.clone()),
                support: Some(vec![version.clone()]),
            },
            (version, support) => ClientMessage::Connect {
                version: version.clone(),
                support: support.clone(),
            },
        }
    }
}
