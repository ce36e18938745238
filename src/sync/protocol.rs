//! Push-channel message types.
//!
//! Frames are JSON envelopes `{eventName, args}`, except the keepalive pair:
//! the server sends the literal text `ping` and expects `alive` back.
//! Every frame is decoded into a closed [`Inbound`] variant right at the
//! channel boundary; unknown event names are rejected, not ignored.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Result, SyncError};
use crate::model::{Layer, ObjectDescriptor, ObjectProperties, WireObject};

pub const PING: &str = "ping";
pub const ALIVE: &str = "alive";

pub const JOIN_STREAM: &str = "join-stream";
pub const SESSION_ID: &str = "ws-session-id";
pub const VOLATILE_MESSAGE: &str = "volatile-message";
pub const VOLATILE_BROADCAST: &str = "volatile-broadcast";
pub const LIVE_UPDATE: &str = "live-update";
pub const METADATA_UPDATE: &str = "metadata-update";
pub const HISTORY_UPDATE: &str = "history-update";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub event_name: String,
    #[serde(default)]
    pub args: Value,
    /// Some servers put the session id beside `args` instead of inside it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Sender => "sender",
            Role::Receiver => "receiver",
        }
    }
}

/// A volatile (not persisted) message between stream clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolatileMessage {
    pub message: String,
    /// Session the message is addressed to, if any.
    pub target: Option<String>,
}

/// Objects plus layout, as carried by `live-update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveUpdate {
    #[serde(default)]
    pub objects: Vec<ObjectDescriptor>,
    #[serde(default)]
    pub object_properties: Vec<ObjectProperties>,
    #[serde(default)]
    pub layers: Vec<Layer>,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataUpdate {
    #[serde(default)]
    pub layers: Vec<Layer>,
    #[serde(default)]
    pub name: String,
}

/// Full stream state as returned by `GET /streams/{id}/data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSnapshot {
    #[serde(default)]
    pub objects: Vec<ObjectDescriptor>,
    #[serde(default)]
    pub object_properties: Vec<ObjectProperties>,
    #[serde(default)]
    pub layers: Vec<Layer>,
    #[serde(default)]
    pub layer_materials: Vec<Value>,
    #[serde(default)]
    pub name: String,
}

/// Body of `PUT /streams/{id}/data`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataUpdateBody<'a> {
    pub objects: &'a [WireObject],
    pub object_properties: &'a [ObjectProperties],
    pub layers: &'a [Layer],
    pub stream_name: &'a str,
}

/// Body of `PUT /streams/{id}/meta`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataUpdateBody<'a> {
    pub layers: &'a [Layer],
    pub stream_name: &'a str,
}

/// Everything the server may push to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Ping,
    SessionId(String),
    VolatileMessage(VolatileMessage),
    VolatileBroadcast(String),
    LiveUpdate(LiveUpdate),
    MetadataUpdate(MetadataUpdate),
    HistoryUpdate(Value),
}

impl Inbound {
    pub fn decode(frame: &str) -> Result<Self> {
        if frame == PING {
            return Ok(Inbound::Ping);
        }

        let Envelope {
            event_name,
            args,
            session_id,
        } = serde_json::from_str(frame)
            .map_err(|e| SyncError::Protocol(format!("malformed frame: {e}")))?;

        match event_name.as_str() {
            SESSION_ID => args
                .get("sessionId")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or(session_id)
                .map(Inbound::SessionId)
                .ok_or_else(|| SyncError::Protocol("ws-session-id without sessionId".into())),
            VOLATILE_MESSAGE => {
                let (message, target) = message_args(&args)?;
                Ok(Inbound::VolatileMessage(VolatileMessage { message, target }))
            }
            VOLATILE_BROADCAST => {
                let (message, _) = message_args(&args)?;
                Ok(Inbound::VolatileBroadcast(message))
            }
            LIVE_UPDATE => serde_json::from_value(args)
                .map(Inbound::LiveUpdate)
                .map_err(|e| SyncError::Protocol(format!("bad live-update: {e}"))),
            METADATA_UPDATE => serde_json::from_value(args)
                .map(Inbound::MetadataUpdate)
                .map_err(|e| SyncError::Protocol(format!("bad metadata-update: {e}"))),
            HISTORY_UPDATE => Ok(Inbound::HistoryUpdate(args)),
            other => Err(SyncError::Protocol(format!("unrecognised event {other:?}"))),
        }
    }
}

fn message_args(args: &Value) -> Result<(String, Option<String>)> {
    match args {
        Value::String(message) => Ok((message.clone(), None)),
        Value::Object(map) => {
            let message = map
                .get("message")
                .and_then(Value::as_str)
                .ok_or_else(|| SyncError::Protocol("volatile message without text".into()))?;
            let target = map
                .get("target")
                .and_then(Value::as_str)
                .map(str::to_string);
            Ok((message.to_string(), target))
        }
        _ => Err(SyncError::Protocol("volatile message without text".into())),
    }
}

/// Everything a client may push to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Alive,
    JoinStream { stream_id: String, role: Role },
    VolatileMessage(VolatileMessage),
    VolatileBroadcast(String),
}

impl Outbound {
    pub fn encode(&self) -> String {
        let envelope = match self {
            Outbound::Alive => return ALIVE.to_string(),
            Outbound::JoinStream { stream_id, role } => json!({
                "eventName": JOIN_STREAM,
                "args": { "streamId": stream_id, "role": role.as_str() },
            }),
            Outbound::VolatileMessage(VolatileMessage { message, target }) => json!({
                "eventName": VOLATILE_MESSAGE,
                "args": { "message": message, "target": target },
            }),
            Outbound::VolatileBroadcast(message) => json!({
                "eventName": VOLATILE_BROADCAST,
                "args": message,
            }),
        };
        envelope.to_string()
    }
}
