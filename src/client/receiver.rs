use std::sync::Arc;

use tokio::sync::mpsc;

use super::runtime::{self, ClientHandle, ReceiverParts, RoleParts, Transport};
use super::{StreamDescriptor, StreamEvent};
use crate::api::{HttpStreamApi, StreamApi};
use crate::config::{ClientConfig, SyncConfig};
use crate::error::{Result, SyncError};
use crate::model::Converter;
use crate::storage::ContentCache;
use crate::sync::protocol::Role;
use crate::sync::remote::{PushConnector, WsConnector};
use crate::sync::resolver::ObjectResolver;

/// Follows a stream someone else publishes.
///
/// On start the receiver fetches and resolves the current stream state, which
/// arrives with [`StreamEvent::Ready`]. Afterwards every live update produces
/// [`StreamEvent::UpdateNotified`] followed by a [`StreamEvent::Data`] with
/// the resolved objects, in arrival order. Heavy objects are fetched once per
/// content hash and served from a cache afterwards.
pub struct StreamReceiver<C: Converter> {
    handle: ClientHandle<C::Native>,
}

impl<C: Converter> StreamReceiver<C> {
    /// Fails with [`SyncError::Config`] when `client.stream_id` is missing.
    pub fn new(client: ClientConfig, converter: C, config: SyncConfig) -> Result<Self> {
        config.validate()?;
        let api = HttpStreamApi::new(&client.rest_endpoint, &client.token, config.request_timeout)?;
        Self::with_transport(client, converter, config, Arc::new(api), Arc::new(WsConnector))
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

    pub fn with_transport(
        client: ClientConfig,
        converter: C,
        config: SyncConfig,
        api: Arc<dyn StreamApi>,
        connector: Arc<dyn PushConnector>,
    ) -> Result<Self> {
        if client.stream_id.as_deref().unwrap_or_default().is_empty() {
            return Err(SyncError::Config("a receiver needs a stream id".into()));
        }
        let resolver = ObjectResolver::new(
            api.clone(),
            Arc::new(converter),
            Arc::new(ContentCache::new()),
            config.resolve_concurrency,
        );
        let handle = runtime::spawn(
            Role::Receiver,
            &client,
            &config,
            Transport { api, connector },
            RoleParts::Receiver(ReceiverParts::new(resolver)),
        );
        Ok(Self { handle })
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

    /// Closes the connection. Receivers never delete the stream unless asked.
    pub async fn dispose(self, delete_stream: bool) {
        self.handle.dispose(delete_stream).await
    }
}
