//! Sender and receiver facades.
//!
//! Each facade spawns one owner task ([`runtime`]) that holds the connection
//! supervisor, the debounce channels and the push connection. Facade calls
//! reach it as commands; everything it has to say comes back as
//! [`StreamEvent`]s on a single channel.

mod receiver;
mod runtime;
mod sender;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;
use crate::model::Layer;
use crate::sync::resolver::Resolved;

pub use receiver::StreamReceiver;
pub use sender::StreamSender;

/// Enough to reattach to a stream later, e.g. after a host restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDescriptor {
    pub rest_endpoint: String,
    #[serde(default)]
    pub ws_endpoint: Option<String>,
    #[serde(default)]
    pub stream_id: Option<String>,
    pub token: String,
}

/// Resolved stream content, in stream order.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamData<N> {
    pub objects: Vec<Resolved<N>>,
    pub layers: Vec<Layer>,
    pub name: String,
}

/// What a receiver knows when it first becomes ready.
#[derive(Debug, Clone, PartialEq)]
pub struct InitialState<N> {
    pub data: StreamData<N>,
    pub layer_materials: Vec<Value>,
}

/// Everything a sender or receiver reports to its host.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent<N> {
    /// Emitted once. Receivers include the initial snapshot.
    Ready {
        stream_id: String,
        initial: Option<InitialState<N>>,
    },
    /// Volatile message addressed to this client.
    Message {
        message: String,
        target: Option<String>,
    },
    Broadcast(String),
    DataSent {
        objects: usize,
        references: usize,
    },
    MetadataSent,
    HistorySaved(Value),
    /// A live update arrived; its resolved [`StreamEvent::Data`] follows.
    UpdateNotified,
    Data(StreamData<N>),
    Metadata {
        layers: Vec<Layer>,
        name: String,
    },
    History(Value),
    Error(SyncError),
}

impl<N> StreamEvent<N> {
    pub fn is_error(&self) -> bool {
        matches!(self, StreamEvent::Error(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Ready { .. } => "ready",
            StreamEvent::Message { .. } => "message",
            StreamEvent::Broadcast(_) => "broadcast",
            StreamEvent::DataSent { .. } => "data-sent",
            StreamEvent::MetadataSent => "metadata-sent",
            StreamEvent::HistorySaved(_) => "history-saved",
            StreamEvent::UpdateNotified => "update",
            StreamEvent::Data(_) => "data",
            StreamEvent::Metadata { .. } => "metadata",
            StreamEvent::History(_) => "history",
            StreamEvent::Error(_) => "error",
        }
    }
}
