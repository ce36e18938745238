//! Connection readiness and reconnection.
//!
//! [`ConnectionSupervisor`] owns no sockets and no timers. The owner feeds it
//! transport events and the current time, and acts on what it returns: open
//! a connection, send a frame, announce readiness. That keeps the whole
//! lifecycle testable with a hand-advanced clock.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Result, SyncError};
use super::protocol::{Inbound, Outbound, Role};

/// Endpoints, credentials and identifiers for one sender or receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub rest_endpoint: String,
    /// Resolved from the server root; `None` until then.
    pub push_endpoint: Option<String>,
    pub token: String,
    pub stream_id: Option<String>,
    /// Assigned by the server after `join-stream`; cleared on every close.
    pub session_id: Option<String>,
}

impl ConnectionState {
    pub fn new(rest_endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            rest_endpoint: rest_endpoint.into(),
            push_endpoint: None,
            token: token.into(),
            stream_id: None,
            session_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Uninitialized,
    FetchingStream,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPhase {
    Disconnected,
    Connecting,
    Open,
    SessionAcquired,
    Closed,
}

/// What a text frame turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Answer immediately on the same channel.
    Reply(Outbound),
    /// Handled here (session handshake).
    Consumed,
    /// Application traffic for the owner.
    Forward(Inbound),
    /// From a connection that has since been replaced.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorAction {
    /// Open a new push connection tagged with `generation`.
    Connect { generation: u64, url: Url },
    /// Every precondition holds; emitted once per instance.
    Ready,
}

#[derive(Debug)]
pub struct ConnectionSupervisor {
    role: Role,
    state: ConnectionState,
    stream_phase: StreamPhase,
    channel_phase: ChannelPhase,
    snapshot_fetched: bool,
    readiness_interval: Duration,
    reconnect_interval: Duration,
    readiness_check_at: Option<Instant>,
    reconnect_at: Option<Instant>,
    ready_emitted: bool,
    generation: u64,
    shut_down: bool,
}

impl ConnectionSupervisor {
    pub fn new(
        role: Role,
        state: ConnectionState,
        readiness_interval: Duration,
        reconnect_interval: Duration,
    ) -> Self {
        Self {
            role,
            state,
            stream_phase: StreamPhase::Uninitialized,
            channel_phase: ChannelPhase::Disconnected,
            snapshot_fetched: false,
            readiness_interval,
            reconnect_interval,
            readiness_check_at: None,
            reconnect_at: None,
            ready_emitted: false,
            generation: 0,
            shut_down: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn stream_phase(&self) -> StreamPhase {
        self.stream_phase
    }

    pub fn channel_phase(&self) -> ChannelPhase {
        self.channel_phase
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self.channel_phase,
            ChannelPhase::Open | ChannelPhase::SessionAcquired
        )
    }

    /// Records the push endpoint advertised by the server root.
    pub fn on_server_info(&mut self, push_endpoint: &str) -> Result<()> {
        Url::parse(push_endpoint).map_err(|e| {
            SyncError::TransportInit(format!("invalid push endpoint {push_endpoint:?}: {e}"))
        })?;
        self.state.push_endpoint = Some(push_endpoint.to_string());
        Ok(())
    }

    /// Starts stream resolution and arms the readiness poll.
    pub fn begin_stream_fetch(&mut self, now: Instant) {
        self.stream_phase = StreamPhase::FetchingStream;
        self.readiness_check_at = Some(now + self.readiness_interval);
    }

    pub fn on_stream_resolved(&mut self, stream_id: impl Into<String>) {
        let stream_id = stream_id.into();
        debug!(stream_id = %stream_id, role = self.role.as_str(), "stream resolved");
        self.state.stream_id = Some(stream_id);
        self.stream_phase = StreamPhase::Ready;
    }

    /// Stream creation or retrieval failed. The instance never becomes ready.
    pub fn on_stream_failed(&mut self) {
        self.stream_phase = StreamPhase::Failed;
        self.readiness_check_at = None;
    }

    pub fn mark_snapshot_fetched(&mut self) {
        self.snapshot_fetched = true;
    }

    /// Opens a fresh connection attempt. `None` until both the push endpoint
    /// and the stream id are known, or after shutdown.
    pub fn connect(&mut self) -> Option<SupervisorAction> {
        if self.shut_down {
            return None;
        }
        let push_endpoint = self.state.push_endpoint.as_deref()?;
        self.state.stream_id.as_ref()?;

        let mut url = Url::parse(push_endpoint).ok()?;
        url.query_pairs_mut()
            .append_pair("access_token", &self.state.token);

        self.generation += 1;
        self.reconnect_at = None;
        self.channel_phase = ChannelPhase::Connecting;
        Some(SupervisorAction::Connect {
            generation: self.generation,
            url,
        })
    }

    /// Transport-level open. Returns the `join-stream` frame to send first.
    pub fn on_open(&mut self, generation: u64) -> Option<Outbound> {
        if generation != self.generation || self.shut_down {
            return None;
        }
        self.channel_phase = ChannelPhase::Open;
        let stream_id = self.state.stream_id.clone()?;
        Some(Outbound::JoinStream {
            stream_id,
            role: self.role,
        })
    }

    pub fn on_frame(&mut self, generation: u64, frame: &str) -> Result<FrameOutcome> {
        if generation != self.generation || self.shut_down {
            return Ok(FrameOutcome::Stale);
        }
        match Inbound::decode(frame)? {
            Inbound::Ping => Ok(FrameOutcome::Reply(Outbound::Alive)),
            Inbound::SessionId(session_id) => {
                info!(session_id = %session_id, role = self.role.as_str(), "push session acquired");
                self.state.session_id = Some(session_id);
                self.channel_phase = ChannelPhase::SessionAcquired;
                Ok(FrameOutcome::Consumed)
            }
            other => Ok(FrameOutcome::Forward(other)),
        }
    }

    /// Transport-level close. Clears the session and schedules a reconnect;
    /// returns the one error to report for this close.
    pub fn on_close(&mut self, generation: u64, now: Instant) -> Option<SyncError> {
        if generation != self.generation
            || self.shut_down
            || self.channel_phase == ChannelPhase::Closed
        {
            return None;
        }
        warn!(role = self.role.as_str(), "push channel closed, reconnecting");
        self.state.session_id = None;
        self.channel_phase = ChannelPhase::Closed;
        self.reconnect_at = Some(now + self.reconnect_interval);
        Some(SyncError::Disconnected)
    }

    pub fn is_ready(&self) -> bool {
        self.state.stream_id.is_some()
            && self.state.session_id.is_some()
            && (self.role == Role::Sender || self.snapshot_fetched)
    }

    pub fn ready_emitted(&self) -> bool {
        self.ready_emitted
    }

    /// Advances both timers.
    pub fn poll(&mut self, now: Instant) -> Vec<SupervisorAction> {
        let mut actions = Vec::new();
        if self.shut_down {
            return actions;
        }

        if self.reconnect_at.is_some_and(|at| at <= now) {
            self.reconnect_at = None;
            if let Some(connect) = self.connect() {
                actions.push(connect);
            }
        }

        if let Some(check_at) = self.readiness_check_at {
            if check_at <= now {
                if self.is_ready() && !self.ready_emitted {
                    self.ready_emitted = true;
                    self.readiness_check_at = None;
                    actions.push(SupervisorAction::Ready);
                } else {
                    self.readiness_check_at = Some(now + self.readiness_interval);
                }
            }
        }

        actions
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.readiness_check_at, self.reconnect_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Cancels both timers and ignores every later transport event.
    pub fn shutdown(&mut self) {
        self.shut_down = true;
        self.readiness_check_at = None;
        self.reconnect_at = None;
        self.state.session_id = None;
        self.channel_phase = ChannelPhase::Closed;
    }
}
