use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version requested in the handshake.
pub const DDP_VERSION: &str = "1";
/// Versions offered to the server during the handshake, most preferred first.
pub const SUPPORTED_VERSIONS: [&str; 3] = ["1", "pre2", "pre1"];
/// Collection prefix reserved for server-push streams.
pub const STREAM_COLLECTION_PREFIX: &str = "stream";
/// Document id the server uses for every stream `changed` message.
pub const STREAM_DOCUMENT_ID: &str = "id";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "msg", rename_all = "snake_case")]
pub enum ClientMessage {
    Connect {
        version: String,
        support: Vec<String>,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Method {
        method: String,
        params: Vec<Value>,
        id: String,
    },
    Sub {
        id: String,
        name: String,
        params: Vec<Value>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "msg", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<String>,
    },
    Failed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Result {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
    },
    Changed {
        collection: String,
        id: String,
        #[serde(default)]
        fields: Value,
    },
    Ready {
        #[serde(default)]
        subs: Vec<String>,
    },
    Nosub {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
    },
    Updated {
        #[serde(default)]
        methods: Vec<String>,
    },
    Error {
        reason: String,
        #[serde(
            rename = "offendingMessage",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        offending_message: Option<Value>,
    },
    #[serde(other)]
    Unknown,
}

/// Payload carried in the `fields` of a stream `changed` message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamFieldsMsg {
    #[serde(rename = "eventName")]
    pub event_name: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl ClientMessage {
    /// Builds the handshake request sent right after the transport opens.
    pub fn connect() -> Self {
        Self::Connect {
            version: DDP_VERSION.to_string(),
            support: SUPPORTED_VERSIONS.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ServerMessage {
    /// Decodes one server message. Objects without a `msg` tag, such as the
    /// `{"server_id":"0"}` greeting, decode to [`ServerMessage::Unknown`].
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        if value.as_object().is_some_and(|object| !object.contains_key("msg")) {
            return Ok(Self::Unknown);
        }
        serde_json::from_value(value)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
