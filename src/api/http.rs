/// HTTP client for the stream server's REST API
///
/// One `reqwest::Client` per sender or receiver. Every call maps transport
/// errors, non-200 statuses and unparsable bodies onto a single
/// `SyncError` naming the operation that failed.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

use super::{unwrap_data, ServerInfo, StreamApi, StreamTarget, SESSION_HEADER, TOKEN_HEADER};
use crate::error::{OperationKind, Result, SyncError};
use crate::sync::payload::CompressedBody;
use crate::sync::protocol::StreamSnapshot;

/// reqwest-backed [`StreamApi`].
#[derive(Debug, Clone)]
pub struct HttpStreamApi {
    base_url: String,
    token: String,
    client: Client,
}

impl HttpStreamApi {
    pub fn new(rest_endpoint: &str, token: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::TransportInit(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: rest_endpoint.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, request: RequestBuilder, session_id: Option<&str>) -> RequestBuilder {
        let request = request.header(TOKEN_HEADER, &self.token);
        match session_id {
            Some(session_id) => request.header(SESSION_HEADER, session_id),
            None => request,
        }
    }

    fn gzip_json(request: RequestBuilder, body: CompressedBody) -> RequestBuilder {
        request
            .header(header::CONTENT_ENCODING, "gzip")
            .header(header::CONTENT_TYPE, "application/json; charset=utf-8")
            .body(body.bytes)
    }

    async fn send(request: RequestBuilder, operation: OperationKind) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| SyncError::operation(operation, e.to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(SyncError::operation(
                operation,
                format!("server answered {}", response.status()),
            ));
        }
        Ok(response)
    }

    async fn call(request: RequestBuilder, operation: OperationKind) -> Result<Value> {
        Self::send(request, operation)
            .await?
            .json::<Value>()
            .await
            .map_err(|e| SyncError::operation(operation, format!("unparsable response: {e}")))
    }
}

#[async_trait]
impl StreamApi for HttpStreamApi {
    async fn server_info(&self) -> Result<ServerInfo> {
        let request = self.authed(self.client.get(self.url("/")), None);
        let reply = Self::call(request, OperationKind::ServerInfo)
            .await
            .map_err(|e| SyncError::TransportInit(e.to_string()))?;

        serde_json::from_value(unwrap_data(reply))
            .map_err(|e| SyncError::TransportInit(format!("failed to parse server response: {e}")))
    }

    async fn create_stream(&self) -> Result<String> {
        let request = self.authed(self.client.post(self.url("/streams")), None);
        let reply = unwrap_data(Self::call(request, OperationKind::CreateStream).await?);

        reply
            .get("streamId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SyncError::operation(OperationKind::CreateStream, "no streamId in reply"))
    }

    async fn get_stream(&self, stream_id: &str) -> Result<StreamSnapshot> {
        let path = format!("/streams/{stream_id}/data");
        let request = self.authed(self.client.get(self.url(&path)), None);
        let reply = unwrap_data(Self::call(request, OperationKind::GetStream).await?);

        serde_json::from_value(reply).map_err(|e| {
            SyncError::operation(OperationKind::GetStream, format!("bad stream data: {e}"))
        })
    }

    async fn update_stream(&self, target: StreamTarget<'_>, body: CompressedBody) -> Result<Value> {
        debug!(stream_id = target.stream_id, size = body.len(), "uploading stream data");
        let path = format!("/streams/{}/data", target.stream_id);
        let request = self.authed(self.client.put(self.url(&path)), target.session_id);
        Self::call(Self::gzip_json(request, body), OperationKind::UpdateStream).await
    }

    async fn update_metadata(
        &self,
        target: StreamTarget<'_>,
        body: CompressedBody,
    ) -> Result<Value> {
        debug!(stream_id = target.stream_id, size = body.len(), "uploading stream metadata");
        let path = format!("/streams/{}/meta", target.stream_id);
        let request = self.authed(self.client.put(self.url(&path)), target.session_id);
        Self::call(Self::gzip_json(request, body), OperationKind::UpdateMetadata).await
    }

    async fn get_geometry(&self, hash: &str, form: &str) -> Result<Value> {
        let path = format!("/geometry/{hash}/{form}");
        let request = self.authed(self.client.get(self.url(&path)), None);
        let reply = Self::call(request, OperationKind::GetGeometry).await?;
        Ok(unwrap_data(reply))
    }

    async fn create_history(&self, target: StreamTarget<'_>, name: Option<&str>) -> Result<Value> {
        let path = format!("/streams/{}/history", target.stream_id);
        let mut request = self.authed(self.client.post(self.url(&path)), target.session_id);
        if let Some(name) = name {
            request = request.json(&json!({ "name": name }));
        }
        Self::call(request, OperationKind::CreateHistory).await
    }

    async fn delete_stream(&self, target: StreamTarget<'_>) -> Result<()> {
        let path = format!("/streams/{}", target.stream_id);
        let request = self.authed(self.client.delete(self.url(&path)), target.session_id);
        Self::send(request, OperationKind::DeleteStream).await?;
        Ok(())
    }
}
