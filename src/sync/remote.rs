use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

/// Transport-level happenings on one push connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEventKind {
    Opened,
    Text(String),
    /// Emitted exactly once per connection, including when it never opened.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    /// Connection attempt this event belongs to.
    pub generation: u64,
    pub kind: PushEventKind,
}

/// Outgoing side of one push connection.
#[derive(Debug)]
pub struct PushHandle {
    outgoing: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl PushHandle {
    pub fn new(outgoing: mpsc::UnboundedSender<String>, task: JoinHandle<()>) -> Self {
        Self { outgoing, task }
    }

    /// Queues a text frame. False once the connection is gone.
    pub fn send(&self, frame: String) -> bool {
        self.outgoing.send(frame).is_ok()
    }

    /// Closes the connection gracefully and returns the task to await.
    pub fn close(self) -> JoinHandle<()> {
        drop(self.outgoing);
        self.task
    }
}

/// Opens push connections. Implementations spawn their own I/O and report
/// back exclusively through `events`.
pub trait PushConnector: Send + Sync + 'static {
    fn connect(
        &self,
        generation: u64,
        url: Url,
        events: mpsc::UnboundedSender<PushEvent>,
    ) -> PushHandle;
}

/// WebSocket connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl PushConnector for WsConnector {
    fn connect(
        &self,
        generation: u64,
        url: Url,
        events: mpsc::UnboundedSender<PushEvent>,
    ) -> PushHandle {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_connection(generation, url, outgoing_rx, events));
        PushHandle::new(outgoing_tx, task)
    }
}

async fn run_connection(
    generation: u64,
    url: Url,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<PushEvent>,
) {
    let emit = |kind| {
        let _ = events.send(PushEvent { generation, kind });
    };

    let ws_stream = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            warn!(generation, error = %e, "push connection failed");
            emit(PushEventKind::Closed);
            return;
        }
    };
    debug!(generation, "push connection open");
    emit(PushEventKind::Opened);

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    loop {
        tokio::select! {
            frame = outgoing.recv() => match frame {
                Some(text) => {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = ws_tx.close().await;
                    break;
                }
            },
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => emit(PushEventKind::Text(text.to_string())),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(generation, error = %e, "push connection error");
                    break;
                }
            },
        }
    }
    emit(PushEventKind::Closed);
}
