//! In-process stream server used by the integration tests.
//!
//! Speaks the REST routes and the push protocol well enough to exercise a
//! real sender and receiver over HTTP and WebSocket.

#![allow(dead_code)]

mod events;

pub use events::{expect_event, fast_config};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use dx_streams::sync::payload::decompress;

struct Peer {
    stream_id: Option<String>,
    outgoing: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    streams: HashMap<String, Value>,
    geometry: HashMap<String, Value>,
    peers: HashMap<String, Peer>,
    /// `(method path, token header, session-id header)` per REST call.
    requests: Vec<(String, Option<String>, Option<String>)>,
    history: Vec<Value>,
}

#[derive(Clone, Default)]
pub struct MockServer {
    inner: Arc<Mutex<Inner>>,
}

pub struct RunningServer {
    pub server: MockServer,
    pub addr: SocketAddr,
    task: tokio::task::JoinHandle<()>,
}

impl RunningServer {
    pub fn rest_endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

impl MockServer {
    /// Binds an ephemeral port and serves until dropped.
    pub async fn start() -> RunningServer {
        let server = MockServer::default();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let app = Router::new()
            .route("/", get(server_info))
            .route("/ws", get(ws_handler))
            .route("/streams", post(create_stream))
            .route("/streams/{id}/data", get(get_stream).put(update_stream))
            .route("/streams/{id}/meta", put(update_metadata))
            .route("/streams/{id}/history", post(create_history))
            .route("/streams/{id}", axum::routing::delete(delete_stream))
            .route("/geometry/{hash}/", get(get_geometry))
            .route("/geometry/{hash}/{form}", get(get_geometry_form))
            .with_state(server.clone());

        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        RunningServer { server, addr, task }
    }

    pub fn insert_stream(&self, stream_id: &str, snapshot: Value) {
        self.inner.lock().streams.insert(stream_id.to_string(), snapshot);
    }

    pub fn insert_geometry(&self, hash: &str, object: Value) {
        self.inner.lock().geometry.insert(hash.to_string(), object);
    }

    pub fn stream(&self, stream_id: &str) -> Option<Value> {
        self.inner.lock().streams.get(stream_id).cloned()
    }

    pub fn has_geometry(&self, hash: &str) -> bool {
        self.inner.lock().geometry.contains_key(hash)
    }

    pub fn requests(&self) -> Vec<(String, Option<String>, Option<String>)> {
        self.inner.lock().requests.clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.inner
            .lock()
            .requests
            .iter()
            .filter(|(call, _, _)| call.starts_with(prefix))
            .count()
    }

    pub fn peers_in(&self, stream_id: &str) -> usize {
        self.inner
            .lock()
            .peers
            .values()
            .filter(|p| p.stream_id.as_deref() == Some(stream_id))
            .count()
    }

    /// Closes every push connection from the server side.
    pub fn drop_connections(&self) {
        self.inner.lock().peers.clear();
    }

    /// Waits until `check` holds, polling every 10ms for up to 5s.
    pub async fn wait_until(&self, mut check: impl FnMut(&MockServer) -> bool) {
        for _ in 0..500 {
            if check(self) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    fn record(&self, call: String, headers: &HeaderMap) {
        self.inner.lock().requests.push((
            call,
            header(headers, "token"),
            header(headers, "session-id"),
        ));
    }

    /// Sends a push frame to every peer of `stream_id` except `skip`.
    fn fan_out(&self, stream_id: &str, skip: Option<&str>, frame: &Value) {
        let inner = self.inner.lock();
        for (session, peer) in &inner.peers {
            if peer.stream_id.as_deref() == Some(stream_id) && Some(session.as_str()) != skip {
                let _ = peer.outgoing.send(Message::Text(frame.to_string().into()));
            }
        }
    }
}

async fn server_info(State(server): State<MockServer>, headers: HeaderMap) -> Json<Value> {
    server.record("GET /".into(), &headers);
    // The REST and push endpoints share the host.
    let host = header(&headers, "host").unwrap_or_default();
    Json(json!({ "data": { "ws": format!("ws://{host}/ws"), "version": "mock" } }))
}

async fn create_stream(State(server): State<MockServer>, headers: HeaderMap) -> Json<Value> {
    server.record("POST /streams".into(), &headers);
    let mut inner = server.inner.lock();
    inner.next_id += 1;
    let stream_id = format!("stream-{}", inner.next_id);
    inner.streams.insert(stream_id.clone(), json!({ "objects": [], "layers": [], "name": "" }));
    Json(json!({ "data": { "streamId": stream_id } }))
}

async fn get_stream(
    State(server): State<MockServer>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    server.record(format!("GET /streams/{id}/data"), &headers);
    server
        .stream(&id)
        .map(|snapshot| Json(json!({ "data": snapshot })))
        .ok_or(StatusCode::NOT_FOUND)
}

fn gunzip(body: &Bytes) -> Result<Value, StatusCode> {
    let raw = decompress(body).map_err(|_| StatusCode::BAD_REQUEST)?;
    serde_json::from_slice(&raw).map_err(|_| StatusCode::BAD_REQUEST)
}

async fn update_stream(
    State(server): State<MockServer>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, StatusCode> {
    server.record(format!("PUT /streams/{id}/data"), &headers);
    let update = gunzip(&body)?;

    // Heavy objects are kept by hash; the stream itself only stores references.
    let mut objects = Vec::new();
    {
        let mut inner = server.inner.lock();
        if !inner.streams.contains_key(&id) {
            return Err(StatusCode::NOT_FOUND);
        }
        for object in update["objects"].as_array().cloned().unwrap_or_default() {
            let heavy = matches!(
                object["type"].as_str(),
                Some("Polyline" | "Curve" | "Mesh" | "Brep")
            );
            match object.get("hash").and_then(Value::as_str).filter(|_| heavy) {
                Some(hash) => {
                    let is_full = object.as_object().is_some_and(|o| o.len() > 2);
                    if is_full {
                        inner.geometry.insert(hash.to_string(), object.clone());
                    }
                    objects.push(json!({ "type": object["type"], "hash": hash }));
                }
                None => objects.push(object),
            }
        }
        let snapshot = json!({
            "objects": objects,
            "objectProperties": update["objectProperties"],
            "layers": update["layers"],
            "name": update["streamName"],
        });
        inner.streams.insert(id.clone(), snapshot);
    }

    let frame = json!({
        "eventName": "live-update",
        "args": {
            "objects": objects,
            "objectProperties": update["objectProperties"],
            "layers": update["layers"],
            "name": update["streamName"],
        }
    });
    let session = header(&headers, "session-id");
    server.fan_out(&id, session.as_deref(), &frame);
    Ok(Json(json!({ "success": true })))
}

async fn update_metadata(
    State(server): State<MockServer>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, StatusCode> {
    server.record(format!("PUT /streams/{id}/meta"), &headers);
    let update = gunzip(&body)?;
    let frame = json!({
        "eventName": "metadata-update",
        "args": { "layers": update["layers"], "name": update["streamName"] }
    });
    let session = header(&headers, "session-id");
    server.fan_out(&id, session.as_deref(), &frame);
    Ok(Json(json!({ "success": true })))
}

async fn create_history(
    State(server): State<MockServer>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    server.record(format!("POST /streams/{id}/history"), &headers);
    let name = serde_json::from_slice::<Value>(&body)
        .ok()
        .and_then(|v| v.get("name").cloned())
        .unwrap_or_else(|| json!("auto"));
    let entry = json!({ "streamId": id, "name": name });
    server.inner.lock().history.push(entry.clone());
    let session = header(&headers, "session-id");
    server.fan_out(
        &id,
        session.as_deref(),
        &json!({ "eventName": "history-update", "args": entry }),
    );
    Json(entry)
}

async fn delete_stream(
    State(server): State<MockServer>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> StatusCode {
    server.record(format!("DELETE /streams/{id}"), &headers);
    match server.inner.lock().streams.remove(&id) {
        Some(_) => StatusCode::OK,
        None => StatusCode::NOT_FOUND,
    }
}

async fn get_geometry(
    State(server): State<MockServer>,
    Path(hash): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    server.record(format!("GET /geometry/{hash}/"), &headers);
    let object = server.inner.lock().geometry.get(&hash).cloned();
    object
        .map(|object| Json(json!({ "data": object })))
        .ok_or(StatusCode::NOT_FOUND)
}

async fn get_geometry_form(
    State(server): State<MockServer>,
    Path((hash, form)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    server.record(format!("GET /geometry/{hash}/{form}"), &headers);
    let object = server.inner.lock().geometry.get(&hash).cloned();
    object
        .map(|object| Json(json!({ "data": object })))
        .ok_or(StatusCode::NOT_FOUND)
}

async fn ws_handler(
    State(server): State<MockServer>,
    ws: WebSocketUpgrade,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(server, socket))
}

async fn handle_ws(server: MockServer, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();

    let session_id = {
        let mut inner = server.inner.lock();
        inner.next_id += 1;
        let session_id = format!("session-{}", inner.next_id);
        inner.peers.insert(
            session_id.clone(),
            Peer {
                stream_id: None,
                outgoing: outgoing_tx.clone(),
            },
        );
        session_id
    };
    drop(outgoing_tx);

    let send_task = tokio::spawn(async move {
        while let Some(message) = outgoing_rx.recv().await {
            if sink.send(message).await.is_err() {
                return;
            }
        }
        // Peer was dropped from the table.
        let _ = sink.close().await;
    });

    while let Some(Ok(message)) = stream.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let text = text.to_string();
        if text == "alive" {
            continue;
        }
        let Ok(envelope) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        let args = envelope["args"].clone();
        match envelope["eventName"].as_str() {
            Some("join-stream") => {
                let stream_id = args["streamId"].as_str().map(str::to_string);
                let mut inner = server.inner.lock();
                if let Some(peer) = inner.peers.get_mut(&session_id) {
                    peer.stream_id = stream_id;
                    let frame = json!({ "eventName": "ws-session-id", "args": { "sessionId": session_id } });
                    let _ = peer.outgoing.send(Message::Text(frame.to_string().into()));
                }
            }
            Some("volatile-broadcast") => {
                let stream_id = server
                    .inner
                    .lock()
                    .peers
                    .get(&session_id)
                    .and_then(|p| p.stream_id.clone());
                if let Some(stream_id) = stream_id {
                    let frame = json!({ "eventName": "volatile-broadcast", "args": args });
                    server.fan_out(&stream_id, Some(&session_id), &frame);
                }
            }
            Some("volatile-message") => {
                let target = args["target"].as_str().unwrap_or_default().to_string();
                let inner = server.inner.lock();
                if let Some(peer) = inner.peers.get(&target) {
                    let frame = json!({ "eventName": "volatile-message", "args": { "message": args["message"] } });
                    let _ = peer.outgoing.send(Message::Text(frame.to_string().into()));
                }
            }
            _ => {}
        }
    }

    server.inner.lock().peers.remove(&session_id);
    send_task.abort();
}
