//! The owner task behind every sender and receiver.
//!
//! One task owns the supervisor, the upload coordinator (senders), the
//! resolver queue (receivers) and the push handle. Facade commands, push
//! events and network completions all arrive over channels, so none of that
//! state is ever touched from two places at once. Timers are a single
//! `sleep_until` on the earliest deadline any state machine reports.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};
use url::Url;

use super::{InitialState, StreamData, StreamDescriptor, StreamEvent};
use crate::api::{ServerInfo, StreamApi, StreamTarget};
use crate::config::{ClientConfig, SyncConfig};
use crate::error::{OperationKind, Result, SyncError};
use crate::model::Converter;
use crate::sync::coordinator::{DataSubmission, MetadataSubmission, UpdateCoordinator, Upload, UploadKind};
use crate::sync::protocol::{Inbound, LiveUpdate, Outbound, Role, StreamSnapshot, VolatileMessage};
use crate::sync::remote::{PushConnector, PushEvent, PushEventKind, PushHandle};
use crate::sync::resolver::ObjectResolver;
use crate::sync::supervisor::{ConnectionState, ConnectionSupervisor, FrameOutcome, SupervisorAction};

/// How long dispose waits for the push connection to close cleanly.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// State the facade reads without going through the owner task.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub stream_id: Option<String>,
    pub ws_endpoint: Option<String>,
}

pub(crate) enum Command<N> {
    SubmitData(DataSubmission<N>),
    SubmitMetadata(MetadataSubmission),
    SnapshotHistory(Option<String>),
    Broadcast(String),
    SendDirect { message: String, target: String },
    Dispose {
        delete_stream: bool,
        done: oneshot::Sender<()>,
    },
}

enum Completion<N> {
    ServerInfo(Result<ServerInfo>),
    StreamResolved(Result<String>),
    SnapshotFetched(Result<StreamSnapshot>),
    SnapshotResolved(InitialState<N>),
    LiveResolved(StreamData<N>),
    UploadDone {
        kind: UploadKind,
        objects: usize,
        references: usize,
        result: Result<Value>,
    },
    HistoryDone(Result<Value>),
}

pub(crate) enum RoleParts<C: Converter> {
    Sender(UpdateCoordinator<C>),
    Receiver(ReceiverParts<C>),
}

pub(crate) struct ReceiverParts<C: Converter> {
    resolver: Arc<ObjectResolver<C>>,
    initial: Option<InitialState<C::Native>>,
    queue: VecDeque<LiveUpdate>,
    resolving: bool,
}

impl<C: Converter> ReceiverParts<C> {
    pub fn new(resolver: ObjectResolver<C>) -> Self {
        Self {
            resolver: Arc::new(resolver),
            initial: None,
            queue: VecDeque::new(),
            resolving: false,
        }
    }
}

/// Network collaborators of one instance.
pub(crate) struct Transport {
    pub api: Arc<dyn StreamApi>,
    pub connector: Arc<dyn PushConnector>,
}

struct Runtime<C: Converter> {
    api: Arc<dyn StreamApi>,
    connector: Arc<dyn PushConnector>,
    supervisor: ConnectionSupervisor,
    parts: RoleParts<C>,
    /// Stream to attach to; `None` makes a sender create one.
    requested_stream: Option<String>,
    push: Option<PushHandle>,
    /// Push messages that arrived before Ready, replayed in order after it.
    held: VecDeque<Inbound>,
    shared: Arc<RwLock<Shared>>,
    events: mpsc::UnboundedSender<StreamEvent<C::Native>>,
    push_tx: mpsc::UnboundedSender<PushEvent>,
    done_tx: mpsc::UnboundedSender<Completion<C::Native>>,
}

/// The facade's end of a running instance.
pub(crate) struct ClientHandle<N> {
    commands: mpsc::UnboundedSender<Command<N>>,
    events: mpsc::UnboundedReceiver<StreamEvent<N>>,
    shared: Arc<RwLock<Shared>>,
    rest_endpoint: String,
    token: String,
    task: JoinHandle<()>,
}

/// Spawns the owner task. Must be called inside a tokio runtime.
pub(crate) fn spawn<C: Converter>(
    role: Role,
    client: &ClientConfig,
    config: &SyncConfig,
    transport: Transport,
    parts: RoleParts<C>,
) -> ClientHandle<C::Native> {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (push_tx, push_rx) = mpsc::unbounded_channel();
    let (done_tx, done_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(RwLock::new(Shared {
        stream_id: client.stream_id.clone(),
        ws_endpoint: None,
    }));

    let runtime = Runtime {
        api: transport.api,
        connector: transport.connector,
        supervisor: ConnectionSupervisor::new(
            role,
            ConnectionState::new(&client.rest_endpoint, &client.token),
            config.readiness_poll,
            config.reconnect_debounce,
        ),
        parts,
        requested_stream: client.stream_id.clone(),
        push: None,
        held: VecDeque::new(),
        shared: shared.clone(),
        events: events_tx,
        push_tx,
        done_tx,
    };
    let task = tokio::spawn(runtime.run(commands_rx, push_rx, done_rx));

    ClientHandle {
        commands: commands_tx,
        events: events_rx,
        shared,
        rest_endpoint: client.rest_endpoint.clone(),
        token: client.token.clone(),
        task,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl<C: Converter> Runtime<C> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command<C::Native>>,
        mut push_rx: mpsc::UnboundedReceiver<PushEvent>,
        mut done_rx: mpsc::UnboundedReceiver<Completion<C::Native>>,
    ) {
        self.start(Instant::now());

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Dispose { delete_stream, done }) => {
                        self.dispose(delete_stream).await;
                        let _ = done.send(());
                        return;
                    }
                    Some(command) => self.on_command(command, Instant::now()),
                    None => {
                        self.dispose(false).await;
                        return;
                    }
                },
                Some(event) = push_rx.recv() => self.on_push_event(event, Instant::now()),
                Some(done) = done_rx.recv() => self.on_completion(done, Instant::now()),
                _ = sleep_until_deadline(deadline) => {}
            }
            self.tick(Instant::now());
        }
    }

    fn role(&self) -> Role {
        self.supervisor.role()
    }

    fn emit(&self, event: StreamEvent<C::Native>) {
        let _ = self.events.send(event);
    }

    fn spawn_completion<F>(&self, work: F)
    where
        F: Future<Output = Completion<C::Native>> + Send + 'static,
    {
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let _ = done.send(work.await);
        });
    }

    fn stream_known(&self) -> bool {
        self.supervisor.state().stream_id.is_some()
    }

    fn next_deadline(&self) -> Option<Instant> {
        let uploads = match &self.parts {
            RoleParts::Sender(coordinator) if self.stream_known() => coordinator.next_deadline(),
            _ => None,
        };
        match (self.supervisor.next_deadline(), uploads) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn start(&mut self, now: Instant) {
        debug!(role = self.role().as_str(), "contacting server");
        self.supervisor.begin_stream_fetch(now);
        let api = self.api.clone();
        self.spawn_completion(async move { Completion::ServerInfo(api.server_info().await) });
    }

    fn tick(&mut self, now: Instant) {
        for action in self.supervisor.poll(now) {
            match action {
                SupervisorAction::Connect { generation, url } => self.open_push(generation, url),
                SupervisorAction::Ready => self.emit_ready(),
            }
        }

        let Some(stream_id) = self.supervisor.state().stream_id.clone() else {
            return;
        };
        let mut released = Vec::new();
        if let RoleParts::Sender(coordinator) = &mut self.parts {
            while let Some(prepared) = coordinator.poll(now) {
                released.push(prepared);
            }
        }
        for prepared in released {
            match prepared {
                Ok(upload) => self.start_upload(&stream_id, upload),
                Err(e) => {
                    warn!(error = %e, "update dropped before sending");
                    self.emit(StreamEvent::Error(e));
                }
            }
        }
    }

    fn emit_ready(&mut self) {
        let Some(stream_id) = self.supervisor.state().stream_id.clone() else {
            return;
        };
        let initial = match &mut self.parts {
            RoleParts::Receiver(parts) => parts.initial.take(),
            RoleParts::Sender(_) => None,
        };
        info!(stream_id = %stream_id, role = self.role().as_str(), "stream ready");
        self.emit(StreamEvent::Ready { stream_id, initial });

        if !self.held.is_empty() {
            debug!(held = self.held.len(), "replaying push messages received before ready");
        }
        while let Some(inbound) = self.held.pop_front() {
            self.on_inbound(inbound);
        }
    }

    fn fail_stream(&mut self, error: SyncError) {
        warn!(error = %error, role = self.role().as_str(), "stream unavailable");
        self.supervisor.on_stream_failed();
        self.emit(StreamEvent::Error(error));
    }

    fn resolve_stream(&mut self) {
        let api = self.api.clone();
        match (self.role(), self.requested_stream.clone()) {
            (Role::Sender, None) => self.spawn_completion(async move {
                Completion::StreamResolved(api.create_stream().await)
            }),
            (Role::Sender, Some(stream_id)) => self.spawn_completion(async move {
                let result = api.get_stream(&stream_id).await.map(|_| stream_id);
                Completion::StreamResolved(result)
            }),
            (Role::Receiver, Some(stream_id)) => self.spawn_completion(async move {
                Completion::SnapshotFetched(api.get_stream(&stream_id).await)
            }),
            (Role::Receiver, None) => {
                self.fail_stream(SyncError::Config("a receiver needs a stream id".into()))
            }
        }
    }

    fn stream_resolved(&mut self, stream_id: String) {
        self.supervisor.on_stream_resolved(stream_id.clone());
        self.shared.write().stream_id = Some(stream_id);
        if let Some(SupervisorAction::Connect { generation, url }) = self.supervisor.connect() {
            self.open_push(generation, url);
        }
    }

    fn open_push(&mut self, generation: u64, url: Url) {
        debug!(generation, "opening push connection");
        // Replacing the handle closes the previous connection; its events are stale.
        self.push = Some(self.connector.connect(generation, url, self.push_tx.clone()));
    }

    fn send_frame(&self, frame: Outbound) -> bool {
        self.push
            .as_ref()
            .is_some_and(|push| push.send(frame.encode()))
    }

    fn on_completion(&mut self, completion: Completion<C::Native>, _now: Instant) {
        match completion {
            Completion::ServerInfo(Ok(info)) => match self.supervisor.on_server_info(&info.ws) {
                Ok(()) => {
                    self.shared.write().ws_endpoint = Some(info.ws);
                    self.resolve_stream();
                }
                Err(e) => self.fail_stream(e),
            },
            Completion::ServerInfo(Err(e)) => self.fail_stream(e),

            Completion::StreamResolved(Ok(stream_id)) => {
                info!(stream_id = %stream_id, "sender attached to stream");
                self.stream_resolved(stream_id);
            }
            Completion::StreamResolved(Err(e)) => self.fail_stream(e),

            Completion::SnapshotFetched(Ok(snapshot)) => {
                let Some(stream_id) = self.requested_stream.clone() else {
                    return;
                };
                self.stream_resolved(stream_id);
                if let RoleParts::Receiver(parts) = &self.parts {
                    let resolver = parts.resolver.clone();
                    self.spawn_completion(async move {
                        let objects = resolver
                            .resolve(&snapshot.objects, &snapshot.object_properties)
                            .await;
                        Completion::SnapshotResolved(InitialState {
                            data: StreamData {
                                objects,
                                layers: snapshot.layers,
                                name: snapshot.name,
                            },
                            layer_materials: snapshot.layer_materials,
                        })
                    });
                }
            }
            Completion::SnapshotFetched(Err(e)) => self.fail_stream(e),

            Completion::SnapshotResolved(initial) => {
                if let RoleParts::Receiver(parts) = &mut self.parts {
                    debug!(objects = initial.data.objects.len(), "initial snapshot resolved");
                    parts.initial = Some(initial);
                }
                self.supervisor.mark_snapshot_fetched();
            }

            Completion::LiveResolved(data) => {
                self.emit(StreamEvent::Data(data));
                if let RoleParts::Receiver(parts) = &mut self.parts {
                    parts.resolving = false;
                }
                self.resolve_next_live();
            }

            Completion::UploadDone {
                kind,
                objects,
                references,
                result,
            } => {
                if let RoleParts::Sender(coordinator) = &mut self.parts {
                    coordinator.complete(kind, result.is_ok());
                }
                match (kind, result) {
                    (UploadKind::Data, Ok(_)) => {
                        self.emit(StreamEvent::DataSent {
                            objects,
                            references,
                        })
                    }
                    (UploadKind::Metadata, Ok(_)) => self.emit(StreamEvent::MetadataSent),
                    (_, Err(e)) => {
                        warn!(error = %e, "upload failed");
                        self.emit(StreamEvent::Error(e));
                    }
                }
            }

            Completion::HistoryDone(Ok(reply)) => self.emit(StreamEvent::HistorySaved(reply)),
            Completion::HistoryDone(Err(e)) => self.emit(StreamEvent::Error(e)),
        }
    }

    fn on_push_event(&mut self, event: PushEvent, now: Instant) {
        match event.kind {
            PushEventKind::Opened => {
                if let Some(join) = self.supervisor.on_open(event.generation) {
                    self.send_frame(join);
                }
            }
            PushEventKind::Text(frame) => match self.supervisor.on_frame(event.generation, &frame) {
                Ok(FrameOutcome::Reply(reply)) => {
                    self.send_frame(reply);
                }
                Ok(FrameOutcome::Forward(inbound)) => self.on_inbound(inbound),
                Ok(FrameOutcome::Consumed) | Ok(FrameOutcome::Stale) => {}
                Err(e) => {
                    warn!(error = %e, "rejected push frame");
                    self.emit(StreamEvent::Error(e));
                }
            },
            PushEventKind::Closed => {
                if let Some(error) = self.supervisor.on_close(event.generation, now) {
                    self.push = None;
                    self.emit(StreamEvent::Error(error));
                }
            }
        }
    }

    fn on_inbound(&mut self, inbound: Inbound) {
        // Ready carries the initial state; nothing newer may overtake it.
        if !self.supervisor.ready_emitted() {
            self.held.push_back(inbound);
            return;
        }
        let is_receiver = matches!(self.parts, RoleParts::Receiver(_));
        match inbound {
            Inbound::VolatileMessage(VolatileMessage { message, target }) => {
                self.emit(StreamEvent::Message { message, target })
            }
            Inbound::VolatileBroadcast(message) => self.emit(StreamEvent::Broadcast(message)),
            Inbound::LiveUpdate(update) if is_receiver => {
                self.emit(StreamEvent::UpdateNotified);
                if let RoleParts::Receiver(parts) = &mut self.parts {
                    parts.queue.push_back(update);
                }
                self.resolve_next_live();
            }
            Inbound::MetadataUpdate(update) if is_receiver => self.emit(StreamEvent::Metadata {
                layers: update.layers,
                name: update.name,
            }),
            Inbound::HistoryUpdate(args) if is_receiver => self.emit(StreamEvent::History(args)),
            other => debug!(?other, role = self.role().as_str(), "ignoring push message"),
        }
    }

    /// Resolves queued live updates one at a time so data events keep
    /// arrival order.
    fn resolve_next_live(&mut self) {
        let RoleParts::Receiver(parts) = &mut self.parts else {
            return;
        };
        if parts.resolving {
            return;
        }
        let Some(update) = parts.queue.pop_front() else {
            return;
        };
        parts.resolving = true;

        let resolver = parts.resolver.clone();
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let objects = resolver
                .resolve(&update.objects, &update.object_properties)
                .await;
            let _ = done.send(Completion::LiveResolved(StreamData {
                objects,
                layers: update.layers,
                name: update.name,
            }));
        });
    }

    fn on_command(&mut self, command: Command<C::Native>, now: Instant) {
        match command {
            Command::SubmitData(submission) => match &mut self.parts {
                RoleParts::Sender(coordinator) => coordinator.submit_data(submission, now),
                RoleParts::Receiver(_) => warn!("receivers cannot submit data"),
            },
            Command::SubmitMetadata(submission) => match &mut self.parts {
                RoleParts::Sender(coordinator) => coordinator.submit_metadata(submission, now),
                RoleParts::Receiver(_) => warn!("receivers cannot submit metadata"),
            },
            Command::SnapshotHistory(name) => {
                let state = self.supervisor.state();
                let Some(stream_id) = state.stream_id.clone() else {
                    self.emit(StreamEvent::Error(SyncError::operation(
                        OperationKind::CreateHistory,
                        "stream is not resolved yet",
                    )));
                    return;
                };
                let session_id = state.session_id.clone();
                let api = self.api.clone();
                self.spawn_completion(async move {
                    let target = StreamTarget {
                        stream_id: &stream_id,
                        session_id: session_id.as_deref(),
                    };
                    Completion::HistoryDone(api.create_history(target, name.as_deref()).await)
                });
            }
            Command::Broadcast(message) => {
                self.send_message(Outbound::VolatileBroadcast(message));
            }
            Command::SendDirect { message, target } => {
                self.send_message(Outbound::VolatileMessage(VolatileMessage {
                    message,
                    target: Some(target),
                }));
            }
            Command::Dispose { .. } => {}
        }
    }

    fn send_message(&self, frame: Outbound) {
        if !self.supervisor.is_open() || !self.send_frame(frame) {
            self.emit(StreamEvent::Error(SyncError::operation(
                OperationKind::SendMessage,
                "push channel is not open",
            )));
        }
    }

    fn start_upload(&self, stream_id: &str, upload: Upload) {
        let Upload {
            kind,
            body,
            object_count,
            references,
        } = upload;
        let stream_id = stream_id.to_string();
        let session_id = self.supervisor.state().session_id.clone();
        let api = self.api.clone();
        self.spawn_completion(async move {
            let target = StreamTarget {
                stream_id: &stream_id,
                session_id: session_id.as_deref(),
            };
            let result = match kind {
                UploadKind::Data => api.update_stream(target, body).await,
                UploadKind::Metadata => api.update_metadata(target, body).await,
            };
            Completion::UploadDone {
                kind,
                objects: object_count,
                references,
                result,
            }
        });
    }

    async fn dispose(&mut self, delete_stream: bool) {
        if let RoleParts::Sender(coordinator) = &mut self.parts {
            coordinator.cancel_all();
        }
        let stream_id = self.supervisor.state().stream_id.clone();
        let session_id = self.supervisor.state().session_id.clone();
        self.supervisor.shutdown();

        if let (true, Some(stream_id)) = (delete_stream, stream_id.as_deref()) {
            let target = StreamTarget {
                stream_id,
                session_id: session_id.as_deref(),
            };
            match self.api.delete_stream(target).await {
                Ok(()) => info!(stream_id, "stream deleted"),
                Err(e) => self.emit(StreamEvent::Error(e)),
            }
        }

        if let Some(push) = self.push.take() {
            let mut task = push.close();
            if timeout(CLOSE_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
        debug!(role = self.role().as_str(), "disposed");
    }
}

impl<N: Send + 'static> ClientHandle<N> {
    pub fn send(&self, command: Command<N>) -> Result<()> {
        self.commands.send(command).map_err(|_| SyncError::Disposed)
    }

    pub async fn next_event(&mut self) -> Option<StreamEvent<N>> {
        self.events.recv().await
    }

    pub fn events(&mut self) -> &mut mpsc::UnboundedReceiver<StreamEvent<N>> {
        &mut self.events
    }

    pub fn stream_id(&self) -> Option<String> {
        self.shared.read().stream_id.clone()
    }

    pub fn rest_endpoint(&self) -> &str {
        &self.rest_endpoint
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn descriptor(&self) -> StreamDescriptor {
        let shared = self.shared.read();
        StreamDescriptor {
            rest_endpoint: self.rest_endpoint.clone(),
            ws_endpoint: shared.ws_endpoint.clone(),
            stream_id: shared.stream_id.clone(),
            token: self.token.clone(),
        }
    }

    pub fn snapshot_history(&self, label: &str) -> Result<()> {
        let name = Some(label.to_string()).filter(|label| !label.is_empty());
        self.send(Command::SnapshotHistory(name))
    }

    pub fn broadcast(&self, message: impl Into<String>) -> Result<()> {
        self.send(Command::Broadcast(message.into()))
    }

    pub fn send_direct(&self, message: impl Into<String>, target_session: impl Into<String>) -> Result<()> {
        self.send(Command::SendDirect {
            message: message.into(),
            target: target_session.into(),
        })
    }

    /// Cancels timers, optionally deletes the stream, then closes the push
    /// connection. Events already queued stay readable until the handle drops.
    pub async fn dispose(self, delete_stream: bool) {
        let (done_tx, done_rx) = oneshot::channel();
        let sent = self.send(Command::Dispose {
            delete_stream,
            done: done_tx,
        });
        if sent.is_ok() {
            let _ = done_rx.await;
        }
        let _ = self.task.await;
    }
}
