//! # dx-streams - Live Stream Sync Engine
//!
//! Client side of a stream server: a sender publishes typed geometry and
//! values, any number of receivers follow along in real time.
//!
//! ## Features
//!
//! - **Debounced uploads**: bursts of edits collapse into one gzip request
//! - **Content-addressed cache**: heavy objects travel once, then by reference
//! - **Push channel**: WebSocket with join handshake, keep-alive and reconnect
//! - **Ordered resolution**: live updates resolve in arrival order with one
//!   fetch per content hash
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dx_streams::{ClientConfig, JsonConverter, StreamEvent, StreamReceiver, SyncConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = ClientConfig::new("https://streams.example.com/api", "token")
//!         .with_stream("stream-id");
//!     let mut receiver = StreamReceiver::new(client, JsonConverter, SyncConfig::default())?;
//!
//!     while let Some(event) = receiver.next_event().await {
//!         match event {
//!             StreamEvent::Data(data) => println!("{}: {} objects", data.name, data.objects.len()),
//!             StreamEvent::Error(e) => eprintln!("{e}"),
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod storage;
pub mod sync;

// Re-export main types for library consumers
pub use client::{InitialState, StreamData, StreamDescriptor, StreamEvent, StreamReceiver, StreamSender};
pub use config::{ClientConfig, SyncConfig};
pub use error::{ErrorCategory, OperationKind, Result, SyncError};
pub use model::{Converter, JsonConverter, Layer, ObjectKind, ObjectProperties, Payload, TypedObject};
pub use sync::Resolved;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
