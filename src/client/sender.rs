use std::sync::Arc;

use tokio::sync::mpsc;

use super::runtime::{self, ClientHandle, Command, RoleParts, Transport};
use super::{StreamDescriptor, StreamEvent};
use crate::api::{HttpStreamApi, StreamApi};
use crate::config::{ClientConfig, SyncConfig};
use crate::error::Result;
use crate::model::{Converter, Layer};
use crate::storage::ContentCache;
use crate::sync::coordinator::{DataSubmission, MetadataSubmission, UpdateCoordinator};
use crate::sync::protocol::Role;
use crate::sync::remote::{PushConnector, WsConnector};

/// Publishes local objects to a stream.
///
/// Submissions are debounced: a burst of [`submit_data`](Self::submit_data)
/// calls results in one upload carrying the last call's objects. Heavy
/// objects the server already confirmed are sent as `{type, hash}`
/// references. Outcomes arrive as [`StreamEvent`]s.
///
/// ```no_run
/// # async fn demo() -> anyhow::Result<()> {
/// use dx_streams::{ClientConfig, JsonConverter, StreamEvent, StreamSender, SyncConfig};
///
/// let client = ClientConfig::new("https://streams.example.com/api", "token");
/// let mut sender = StreamSender::new(client, JsonConverter, SyncConfig::default())?;
/// while let Some(event) = sender.next_event().await {
///     if let StreamEvent::Ready { .. } = event {
///         sender.submit_data(vec![serde_json::json!({"type": "Number", "value": 1.0})], vec![], "demo")?;
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct StreamSender<C: Converter> {
    handle: ClientHandle<C::Native>,
}

impl<C: Converter> StreamSender<C> {
    /// Connects over HTTP and WebSocket. Creates a stream unless
    /// `client.stream_id` names one.
    pub fn new(client: ClientConfig, converter: C, config: SyncConfig) -> Result<Self> {
        config.validate()?;
        let api = HttpStreamApi::new(&client.rest_endpoint, &client.token, config.request_timeout)?;
        Ok(Self::with_transport(
            client,
            converter,
            config,
            Arc::new(api),
            Arc::new(WsConnector),
        ))
    }

    pub fn from_descriptor(
        descriptor: &StreamDescriptor,
        converter: C,
        config: SyncConfig,
    ) -> Result<Self> {
        let mut client = ClientConfig::new(&descriptor.rest_endpoint, &descriptor.token);
        client.stream_id = descriptor.stream_id.clone();
        Self::new(client, converter, config)
    }

    /// Uses the given collaborators instead of the HTTP/WebSocket ones.
    pub fn with_transport(
        client: ClientConfig,
        converter: C,
        config: SyncConfig,
        api: Arc<dyn StreamApi>,
        connector: Arc<dyn PushConnector>,
    ) -> Self {
        let coordinator = UpdateCoordinator::new(
            Arc::new(converter),
            Arc::new(ContentCache::new()),
            config.data_debounce,
            config.metadata_debounce,
            config.max_payload_bytes,
        );
        let handle = runtime::spawn(
            Role::Sender,
            &client,
            &config,
            Transport { api, connector },
            RoleParts::Sender(coordinator),
        );
        Self { handle }
    }

    /// Schedules an upload of `objects`, replacing any pending one and
    /// cancelling a pending metadata update.
    pub fn submit_data(
        &self,
        objects: Vec<C::Native>,
        layers: Vec<Layer>,
        name: impl Into<String>,
    ) -> Result<()> {
        self.handle.send(Command::SubmitData(DataSubmission {
            objects,
            layers,
            name: name.into(),
        }))
    }

    /// Schedules a layers-and-name update.
    pub fn submit_metadata(&self, layers: Vec<Layer>, name: impl Into<String>) -> Result<()> {
        self.handle.send(Command::SubmitMetadata(MetadataSubmission {
            layers,
            name: name.into(),
        }))
    }

    pub fn snapshot_history(&self, label: &str) -> Result<()> {
        self.handle.snapshot_history(label)
    }

    pub fn broadcast(&self, message: impl Into<String>) -> Result<()> {
        self.handle.broadcast(message)
    }

    pub fn send_direct(&self, message: impl Into<String>, target_session: impl Into<String>) -> Result<()> {
        self.handle.send_direct(message, target_session)
    }

    pub async fn next_event(&mut self) -> Option<StreamEvent<C::Native>> {
        self.handle.next_event().await
    }

    pub fn events(&mut self) -> &mut mpsc::UnboundedReceiver<StreamEvent<C::Native>> {
        self.handle.events()
    }

    /// `None` until the stream has been created or verified.
    pub fn stream_id(&self) -> Option<String> {
        self.handle.stream_id()
    }

    pub fn rest_endpoint(&self) -> &str {
        self.handle.rest_endpoint()
    }

    pub fn token(&self) -> &str {
        self.handle.token()
    }

    pub fn descriptor(&self) -> StreamDescriptor {
        self.handle.descriptor()
    }

    /// Cancels pending uploads and closes the connection. With
    /// `delete_stream`, also deletes the stream on the server.
    pub async fn dispose(self, delete_stream: bool) {
        self.handle.dispose(delete_stream).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockStreamApi;
    use crate::client::runtime::testing::MockConnector;
    use crate::error::SyncError;
    use crate::model::JsonConverter;
    use serde_json::{json, Value};
    use std::time::Duration;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn sender(
        stream_id: Option<&str>,
    ) -> (StreamSender<JsonConverter>, Arc<MockStreamApi>, Arc<MockConnector>) {
        let api = Arc::new(MockStreamApi::new());
        let connector = Arc::new(MockConnector::default());
        let mut client = ClientConfig::new("http://mock/api", "tok");
        client.stream_id = stream_id.map(str::to_string);
        let sender = StreamSender::with_transport(
            client,
            JsonConverter,
            SyncConfig::default(),
            api.clone(),
            connector.clone(),
        );
        (sender, api, connector)
    }

    async fn ready(sender: &mut StreamSender<JsonConverter>, connector: &MockConnector) -> String {
        connector.handshake(1, "session-1").await;
        match sender.next_event().await {
            Some(StreamEvent::Ready { stream_id, initial }) => {
                assert!(initial.is_none());
                stream_id
            }
            other => panic!("expected ready, got {other:?}"),
        }
    }

    fn mesh(tag: i64) -> Value {
        json!({ "type": "Mesh", "vertices": [0.0, 1.0, 2.0], "faces": [tag] })
    }

    #[tokio::test(start_paused = true)]
    async fn test_creates_stream_and_becomes_ready() {
        let (mut sender, api, connector) = sender(None);
        assert_eq!(ready(&mut sender, &connector).await, "created");
        assert_eq!(sender.stream_id().as_deref(), Some("created"));
        assert_eq!(api.calls()[..2], ["GET /".to_string(), "POST /streams".to_string()]);

        let join: Value = serde_json::from_str(&connector.outgoing(1)[0]).unwrap();
        assert_eq!(join["eventName"], "join-stream");
        assert_eq!(join["args"]["role"], "sender");
        assert!(connector.url(1).as_str().contains("access_token=tok"));

        let descriptor = sender.descriptor();
        assert_eq!(descriptor.stream_id.as_deref(), Some("created"));
        assert_eq!(descriptor.ws_endpoint.as_deref(), Some("ws://127.0.0.1:9"));
        sender.dispose(false).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_stream_is_verified_not_created() {
        let (mut sender, api, connector) = sender(Some("s1"));
        assert_eq!(ready(&mut sender, &connector).await, "s1");
        assert_eq!(api.count("POST /streams"), 0);
        assert_eq!(api.count("GET /streams/s1/data"), 1);
        sender.dispose(false).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_uploads_once_then_by_reference() {
        let (mut sender, api, connector) = sender(Some("s1"));
        ready(&mut sender, &connector).await;

        for name in ["a", "b", "c"] {
            sender.submit_data(vec![mesh(1), json!({ "type": "Number", "value": 2.0 })], vec![], name).unwrap();
            tokio::time::sleep(ms(100)).await;
        }
        assert_eq!(
            sender.next_event().await,
            Some(StreamEvent::DataSent { objects: 2, references: 0 })
        );
        assert_eq!(api.count("PUT /streams/s1/data"), 1);
        assert_eq!(api.uploads()[0]["streamName"], "c");

        sender.submit_data(vec![mesh(1)], vec![], "d").unwrap();
        assert_eq!(
            sender.next_event().await,
            Some(StreamEvent::DataSent { objects: 1, references: 1 })
        );
        let second = &api.uploads()[1];
        assert!(second["objects"][0].get("vertices").is_none());
        sender.dispose(false).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_upload_reports_error_and_keeps_stage() {
        let (mut sender, api, connector) = sender(Some("s1"));
        ready(&mut sender, &connector).await;

        api.fail_updates(true);
        sender.submit_data(vec![mesh(7)], vec![], "x").unwrap();
        match sender.next_event().await {
            Some(StreamEvent::Error(SyncError::Operation { .. })) => {}
            other => panic!("expected operation error, got {other:?}"),
        }

        api.fail_updates(false);
        sender.submit_data(vec![mesh(7)], vec![], "x").unwrap();
        assert_eq!(
            sender.next_event().await,
            Some(StreamEvent::DataSent { objects: 1, references: 0 })
        );
        sender.dispose(false).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_submissions_before_stream_is_known_are_held() {
        let (mut sender, api, connector) = sender(Some("s1"));
        sender.submit_metadata(vec![Layer::new("l", "g", 0, 0, 0)], "early").unwrap();
        connector.handshake(1, "session-1").await;

        let mut names = vec![
            sender.next_event().await.unwrap().name(),
            sender.next_event().await.unwrap().name(),
        ];
        names.sort();
        assert_eq!(names, ["metadata-sent", "ready"]);
        assert_eq!(api.count("PUT /streams/s1/meta"), 1);
        assert_eq!(api.uploads()[0]["streamName"], "early");
        sender.dispose(false).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_and_history() {
        let (mut sender, api, connector) = sender(Some("s1"));
        ready(&mut sender, &connector).await;

        sender.broadcast("hello all").unwrap();
        sender.send_direct("hi", "peer-2").unwrap();
        sender.snapshot_history("v1").unwrap();
        match sender.next_event().await {
            Some(StreamEvent::HistorySaved(reply)) => assert_eq!(reply["name"], "v1"),
            other => panic!("expected history, got {other:?}"),
        }
        assert_eq!(api.count("POST /streams/s1/history"), 1);

        tokio::time::sleep(ms(1)).await;
        let frames = connector.outgoing(1);
        assert!(frames.iter().any(|f| f.contains("volatile-broadcast") && f.contains("hello all")));
        assert!(frames.iter().any(|f| f.contains("volatile-message") && f.contains("peer-2")));

        connector
            .push_text(1, r#"{"eventName":"volatile-message","args":{"message":"yo"}}"#)
            .await;
        assert_eq!(
            sender.next_event().await,
            Some(StreamEvent::Message {
                message: "yo".into(),
                target: None
            })
        );
        sender.dispose(false).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_answered_and_reconnect_after_close() {
        let (mut sender, _api, connector) = sender(Some("s1"));
        ready(&mut sender, &connector).await;

        connector.push_text(1, "ping").await;
        tokio::time::sleep(ms(1)).await;
        assert_eq!(connector.outgoing(1).last().map(String::as_str), Some("alive"));

        connector.close(1).await;
        assert_eq!(sender.next_event().await, Some(StreamEvent::Error(SyncError::Disconnected)));
        assert!(sender.broadcast("lost").is_ok());
        assert!(matches!(
            sender.next_event().await,
            Some(StreamEvent::Error(SyncError::Operation { .. }))
        ));

        tokio::time::sleep(ms(1000)).await;
        connector.wait_for(2).await;
        connector.open(2).await;
        tokio::time::sleep(ms(1)).await;
        assert!(connector.outgoing(2)[0].contains("join-stream"));
        sender.dispose(false).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_payload_is_an_error_event() {
        let api = Arc::new(MockStreamApi::new());
        let connector = Arc::new(MockConnector::default());
        let config = SyncConfig {
            max_payload_bytes: 32,
            ..SyncConfig::default()
        };
        let mut sender = StreamSender::with_transport(
            ClientConfig::new("http://mock/api", "tok").with_stream("s1"),
            JsonConverter,
            config,
            api.clone(),
            connector.clone(),
        );
        ready(&mut sender, &connector).await;

        sender.submit_data(vec![mesh(1), mesh(2)], vec![], "big").unwrap();
        assert!(matches!(
            sender.next_event().await,
            Some(StreamEvent::Error(SyncError::PayloadTooLarge { limit: 32, .. }))
        ));
        assert_eq!(api.count("PUT"), 0);
        sender.dispose(false).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_deletes_stream_when_asked() {
        let (mut sender, api, connector) = sender(Some("s1"));
        ready(&mut sender, &connector).await;
        sender.submit_data(vec![mesh(1)], vec![], "pending").unwrap();
        sender.dispose(true).await;

        assert_eq!(api.count("DELETE /streams/s1"), 1);
        assert_eq!(api.count("PUT"), 0);
    }
}
