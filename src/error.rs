//! Sync error taxonomy
//!
//! Every failure the engine can surface to a host maps onto one [`SyncError`]
//! variant, and every variant onto an [`ErrorCategory`] that tells the host
//! whether the instance is still usable and what to try next.

use std::fmt;

use thiserror::Error;

/// Request/response operations issued against the stream server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    ServerInfo,
    CreateStream,
    GetStream,
    UpdateStream,
    UpdateMetadata,
    GetGeometry,
    CreateHistory,
    DeleteStream,
    SendMessage,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OperationKind::ServerInfo => "contact server",
            OperationKind::CreateStream => "create stream",
            OperationKind::GetStream => "retrieve stream",
            OperationKind::UpdateStream => "update stream",
            OperationKind::UpdateMetadata => "update stream metadata",
            OperationKind::GetGeometry => "retrieve object",
            OperationKind::CreateHistory => "create a new history instance",
            OperationKind::DeleteStream => "delete stream",
            OperationKind::SendMessage => "send message",
        };
        f.write_str(label)
    }
}

/// Errors surfaced by senders and receivers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// The server could not be contacted when the instance started. Fatal.
    #[error("failed to initialise transport: {0}")]
    TransportInit(String),

    /// A request/response call failed (non-200 status or unparsable body).
    #[error("failed to {operation}: {reason}")]
    Operation {
        operation: OperationKind,
        reason: String,
    },

    /// The push channel closed; a reconnect is already scheduled.
    #[error("disconnected from server")]
    Disconnected,

    /// A single object could not be fetched or decoded.
    #[error("failed to retrieve object {hash}: {reason}")]
    Resolution { hash: String, reason: String },

    /// The compressed body exceeded the ceiling and was not sent.
    #[error(
        "compressed payload size {size} exceeds {limit} bytes; consider splitting this into multiple streams. Data was NOT sent"
    )]
    PayloadTooLarge { size: usize, limit: usize },

    /// An envelope could not be decoded or named an unknown event.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The sender or receiver has been disposed.
    #[error("instance has been disposed")]
    Disposed,
}

impl SyncError {
    pub fn operation(operation: OperationKind, reason: impl Into<String>) -> Self {
        SyncError::Operation {
            operation,
            reason: reason.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::TransportInit(_) | SyncError::Config(_) | SyncError::Disposed => {
                ErrorCategory::Fatal
            }
            SyncError::Operation { .. } => ErrorCategory::Operation,
            SyncError::Disconnected => ErrorCategory::Disconnect,
            SyncError::Resolution { .. } => ErrorCategory::Resolution,
            SyncError::PayloadTooLarge { .. } => ErrorCategory::PayloadTooLarge,
            SyncError::Protocol(_) => ErrorCategory::Protocol,
        }
    }

    /// Human hints for hosts that show errors to users.
    pub fn suggestions(&self) -> Vec<&'static str> {
        match self.category() {
            ErrorCategory::Fatal => vec![
                "Check the server URL and your access token",
                "Create a new sender or receiver once the server is reachable",
            ],
            ErrorCategory::Operation => vec![
                "Check your network connection",
                "Resubmit the change; failed operations are not retried",
            ],
            ErrorCategory::Disconnect => vec!["The client reconnects automatically"],
            ErrorCategory::Resolution => vec!["The object will be fetched again on the next update"],
            ErrorCategory::PayloadTooLarge => vec![
                "Split the objects across multiple streams",
                "Send fewer or lighter objects per update",
            ],
            ErrorCategory::Protocol => vec!["Check that the client and server versions match"],
        }
    }
}

/// Coarse classes of [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The instance is unusable.
    Fatal,
    /// One request failed; the caller may resubmit.
    Operation,
    /// Push channel dropped; reconnect is automatic.
    Disconnect,
    /// One object slot failed; the rest of the batch is intact.
    Resolution,
    /// Rejected before sending.
    PayloadTooLarge,
    Protocol,
}

impl ErrorCategory {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorCategory::Fatal)
    }

    /// Whether resubmitting the same call can help.
    pub fn is_retryable_by_caller(&self) -> bool {
        matches!(self, ErrorCategory::Operation | ErrorCategory::Resolution)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
