//! Request/response side of the stream server.

pub mod http;
#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::sync::payload::CompressedBody;
use crate::sync::protocol::StreamSnapshot;

pub use http::HttpStreamApi;

/// Header carrying the access token.
pub const TOKEN_HEADER: &str = "token";
/// Header carrying the push-channel session id, once known.
pub const SESSION_HEADER: &str = "session-id";

/// Reply of `GET /` on the REST endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Push-channel endpoint.
    pub ws: String,
    #[serde(flatten)]
    pub capabilities: Map<String, Value>,
}

/// Identifies the caller on calls that mutate a stream.
#[derive(Debug, Clone, Copy)]
pub struct StreamTarget<'a> {
    pub stream_id: &'a str,
    pub session_id: Option<&'a str>,
}

/// Every call fails with [`SyncError::Operation`](crate::SyncError::Operation)
/// on a non-200 status or an unparsable body, except `server_info`, which
/// fails with `TransportInit`.
#[async_trait]
pub trait StreamApi: Send + Sync + 'static {
    async fn server_info(&self) -> Result<ServerInfo>;

    /// Creates a stream and returns its id.
    async fn create_stream(&self) -> Result<String>;

    async fn get_stream(&self, stream_id: &str) -> Result<StreamSnapshot>;

    async fn update_stream(&self, target: StreamTarget<'_>, body: CompressedBody) -> Result<Value>;

    async fn update_metadata(&self, target: StreamTarget<'_>, body: CompressedBody)
        -> Result<Value>;

    /// Fetches one object by content hash. `form` is `"native"` or empty.
    async fn get_geometry(&self, hash: &str, form: &str) -> Result<Value>;

    async fn create_history(&self, target: StreamTarget<'_>, name: Option<&str>) -> Result<Value>;

    async fn delete_stream(&self, target: StreamTarget<'_>) -> Result<()>;
}

/// Most replies wrap their payload as `{data: ...}`; a few do not.
pub fn unwrap_data(value: Value) -> Value {
    match value {
        Value::Object(mut map) => match map.remove("data") {
            Some(data) => data,
            None => Value::Object(map),
        },
        other => other,
    }
}
