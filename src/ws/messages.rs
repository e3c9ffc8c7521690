//! WebSocket message types: envelope, handshake, and subscription payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LinkError, Result};

/// Handshake sent on a fresh connection.
pub const REGISTER_CONTROL: &str = "register_control";
/// Handshake sent when reconnecting an existing session.
pub const RESUME: &str = "resume";
/// Server accepted a `register_control` handshake.
pub const READY: &str = "ready";
/// Server accepted a `resume` handshake.
pub const CONTINUE: &str = "continue";
/// Server rejected a handshake.
pub const INVALID: &str = "invalid";
/// Request sent before an intentional disconnect.
pub const PREPARE_DISCONNECT: &str = "prepare_disconnect";
/// Server echo of raw frames for debugging.
pub const DEBUG_WS_MESSAGE_EVENT: &str = "debug_ws_message_event";

const REQUEST_SUFFIX: &str = "_request";
const RESPONSE_SUFFIX: &str = "_response";

/// Top-level frame envelope shared by both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sequence number assigned by the sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    /// Message kind discriminator.
    #[serde(rename = "type")]
    pub kind: String,
    /// Kind-specific payload.
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Creates an envelope without a sequence number.
    #[must_use]
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            seq: None,
            kind: kind.into(),
            data,
        }
    }

    /// Creates a request envelope for `kind`.
    #[must_use]
    pub fn request(kind: &str, data: Value) -> Self {
        Self::new(format!("{kind}{REQUEST_SUFFIX}"), data)
    }

    /// Creates the response to a request envelope with sequence `seq`.
    #[must_use]
    pub fn response(kind: &str, seq: u64, mut data: Value) -> Self {
        if let Value::Object(map) = &mut data {
            map.insert("seq".to_string(), Value::from(seq));
        } else {
            data = serde_json::json!({ "seq": seq });
        }
        Self::new(format!("{kind}{RESPONSE_SUFFIX}"), data)
    }

    /// Returns a copy with the given sequence number.
    #[must_use]
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    /// Returns the sequence number of the request this frame answers.
    #[must_use]
    pub fn response_to(&self) -> Option<u64> {
        if !self.kind.ends_with(RESPONSE_SUFFIX) {
            return None;
        }
        self.data.get("seq").and_then(Value::as_u64)
    }

    /// Converts a response frame into the request result.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Remote`] if the payload carries an `error`
    /// string.
    pub fn into_response(self) -> Result<Value> {
        let mut data = self.data;
        if let Value::Object(map) = &mut data {
            map.remove("seq");
            if let Some(Value::String(message)) = map.remove("error") {
                return Err(LinkError::Remote(message));
            }
        }
        Ok(data)
    }

    /// Decodes `data` into a typed payload.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Serialization`] if the payload does not match.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.data)?)
    }

    /// Serializes the envelope into a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Serialization`] on serializer failure.
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Protocol`] if the frame is not a valid envelope.
    pub fn from_text(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| LinkError::Protocol(format!("malformed frame: {e}")))
    }
}

/// `register_control` handshake payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterControl {
    /// Opaque access token.
    pub token: String,
    /// Client identifier.
    pub agent: String,
    /// Client version.
    pub version: String,
}

/// `resume` handshake payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeSession {
    /// Token from the `ready` reply of the session being resumed.
    pub session_token: String,
}

/// Account the session is authenticated as.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account name.
    pub name: String,
}

/// `ready` handshake reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ready {
    /// Token used to resume this session after a drop.
    pub session_token: String,
    /// Authenticated account.
    #[serde(default)]
    pub account: Account,
}

/// `invalid` handshake reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invalid {
    /// Rejection reason.
    #[serde(default)]
    pub message: String,
}

/// Subscription declaration for node, instance, and save-list updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetSubscriptions {
    /// Subscribe to every entity of the class.
    pub all: bool,
    /// Individually subscribed ids.
    pub ids: Vec<u64>,
}

/// Subscription declaration for log records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetLogSubscriptions {
    /// Every log record in the cluster (always `false` for this client).
    pub all: bool,
    /// Server's own log (always `false` for this client).
    pub master: bool,
    /// Node logs (always empty for this client).
    pub node_ids: Vec<u64>,
    /// Instances whose logs are followed.
    pub instance_ids: Vec<u64>,
    /// Level filter; `None` means no filter.
    pub max_level: Option<String>,
}

/// Raw frame echoed by the server for debugging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugWsMessage {
    /// `"in"` or `"out"` from the server's point of view.
    pub direction: String,
    /// Frame content.
    pub content: Value,
}
