//! In-memory [`StreamApi`] for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::{ServerInfo, StreamApi, StreamTarget};
use crate::error::{OperationKind, Result, SyncError};
use crate::sync::payload::{decompress, CompressedBody};
use crate::sync::protocol::StreamSnapshot;

#[derive(Default)]
pub struct MockStreamApi {
    /// hash -> (object, artificial latency)
    geometry: Mutex<HashMap<String, (Value, Duration)>>,
    snapshot: Mutex<StreamSnapshot>,
    calls: Mutex<Vec<String>>,
    uploads: Mutex<Vec<Value>>,
    fail_updates: AtomicBool,
}

impl MockStreamApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_geometry(self, hash: &str, object: Value, delay: Duration) -> Self {
        self.geometry.lock().insert(hash.to_string(), (object, delay));
        self
    }

    pub fn with_snapshot(self, snapshot: StreamSnapshot) -> Self {
        *self.snapshot.lock() = snapshot;
        self
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn uploads(&self) -> Vec<Value> {
        self.uploads.lock().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn upload(&self, operation: OperationKind, body: CompressedBody) -> Result<Value> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(SyncError::operation(operation, "server answered 500"));
        }
        let json = decompress(&body.bytes).map_err(|e| SyncError::operation(operation, e.to_string()))?;
        let value: Value =
            serde_json::from_slice(&json).map_err(|e| SyncError::operation(operation, e.to_string()))?;
        self.uploads.lock().push(value);
        Ok(json!({ "success": true }))
    }
}

#[async_trait]
impl StreamApi for MockStreamApi {
    async fn server_info(&self) -> Result<ServerInfo> {
        self.record("GET /".into());
        Ok(ServerInfo {
            ws: "ws://127.0.0.1:9".into(),
            capabilities: Default::default(),
        })
    }

    async fn create_stream(&self) -> Result<String> {
        self.record("POST /streams".into());
        Ok("created".into())
    }

    async fn get_stream(&self, stream_id: &str) -> Result<StreamSnapshot> {
        self.record(format!("GET /streams/{stream_id}/data"));
        Ok(self.snapshot.lock().clone())
    }

    async fn update_stream(&self, target: StreamTarget<'_>, body: CompressedBody) -> Result<Value> {
        self.record(format!("PUT /streams/{}/data", target.stream_id));
        self.upload(OperationKind::UpdateStream, body)
    }

    async fn update_metadata(&self, target: StreamTarget<'_>, body: CompressedBody) -> Result<Value> {
        self.record(format!("PUT /streams/{}/meta", target.stream_id));
        self.upload(OperationKind::UpdateMetadata, body)
    }

    async fn get_geometry(&self, hash: &str, form: &str) -> Result<Value> {
        self.record(format!("GET /geometry/{hash}/{form}"));
        let entry = self.geometry.lock().get(hash).cloned();
        match entry {
            Some((object, delay)) => {
                tokio::time::sleep(delay).await;
                Ok(object)
            }
            None => Err(SyncError::operation(
                OperationKind::GetGeometry,
                "server answered 404 Not Found",
            )),
        }
    }

    async fn create_history(&self, target: StreamTarget<'_>, name: Option<&str>) -> Result<Value> {
        self.record(format!("POST /streams/{}/history", target.stream_id));
        Ok(json!({ "name": name }))
    }

    async fn delete_stream(&self, target: StreamTarget<'_>) -> Result<()> {
        self.record(format!("DELETE /streams/{}", target.stream_id));
        Ok(())
    }
}
