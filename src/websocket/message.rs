use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Messages sent from client to server.
///
/// Every inbound frame must be a JSON object. The `type` field selects a
/// known variant; anything unrecognised lands in [`ClientMessage::Other`]
/// with the full object preserved.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Ping,
    Other(Map<String, Value>),
}

impl ClientMessage {
    pub fn from_object(object: Map<String, Value>) -> Self {
        match object.get("type").and_then(Value::as_str) {
            Some("ping") => Self::Ping,
            _ => Self::Other(object),
        }
    }

    /// Label used for logging and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Other(_) => "echo",
        }
    }
}

impl<'de> Deserialize<'de> for ClientMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Map::deserialize(deserializer).map(Self::from_object)
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Pong {
        timestamp: DateTime<Utc>,
    },
    Echo {
        data: Map<String, Value>,
    },
    Broadcast {
        group: String,
        data: Value,
    },
    Direct {
        data: Value,
    },
    Heartbeat,
    Shutdown {
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reconnect_after_seconds: Option<u64>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn pong() -> Self {
        Self::Pong {
            timestamp: Utc::now(),
        }
    }

    pub fn echo(data: Map<String, Value>) -> Self {
        Self::Echo { data }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn shutdown(reason: impl Into<String>, reconnect_after_seconds: Option<u64>) -> Self {
        Self::Shutdown {
            reason: reason.into(),
            reconnect_after_seconds,
        }
    }

    /// Build the reply for an inbound message
    pub fn reply_to(msg: ClientMessage) -> Self {
        match msg {
            ClientMessage::Ping => Self::pong(),
            ClientMessage::Other(data) => Self::echo(data),
        }
    }
}

/// What actually travels through a connection's outbound queue.
///
/// Fan-out serializes once and hands every recipient the same shared text.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Raw(ServerMessage),
    Serialized(Arc<str>),
}

impl OutboundMessage {
    pub fn preserialize(message: &ServerMessage) -> Result<Self, serde_json::Error> {
        Ok(Self::Serialized(Arc::from(serde_json::to_string(message)?)))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Raw(message) => serde_json::to_string(message),
            Self::Serialized(text) => Ok(text.to_string()),
        }
    }
}
