//! Wire protocol, timers and the state machines that drive a stream.
//!
//! Nothing in here spawns tasks except [`remote::WsConnector`]; the
//! supervisor, debouncer and coordinator are plain state machines advanced
//! with an explicit `now`, which keeps them testable without a runtime.

pub mod coordinator;
pub mod debounce;
pub mod payload;
pub mod protocol;
pub mod remote;
pub mod resolver;
pub mod supervisor;

pub use coordinator::{DataSubmission, MetadataSubmission, UpdateCoordinator, Upload, UploadKind};
pub use debounce::Debouncer;
pub use payload::{CompressedBody, MAX_PAYLOAD_BYTES};
pub use protocol::{Inbound, Outbound, Role};
pub use remote::{PushConnector, PushEvent, PushEventKind, PushHandle, WsConnector};
pub use resolver::{ObjectResolver, Resolved};
pub use supervisor::{ConnectionState, ConnectionSupervisor};
