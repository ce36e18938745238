//! Timings, limits and endpoints.
//!
//! [`SyncConfig`] carries every interval and ceiling the engine uses; it can
//! come from a TOML file, from `DX_STREAMS_*` environment variables, or both.
//! [`ClientConfig`] names the server, token and (optionally) the stream.

use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use humantime_serde::re::humantime;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::sync::payload::MAX_PAYLOAD_BYTES;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Quiet period before a data update is uploaded.
    #[serde(with = "humantime_serde")]
    pub data_debounce: Duration,

    /// Quiet period before a metadata-only update is uploaded.
    #[serde(with = "humantime_serde")]
    pub metadata_debounce: Duration,

    /// Delay between a push-channel close and the reconnect attempt.
    #[serde(with = "humantime_serde")]
    pub reconnect_debounce: Duration,

    /// Interval of the readiness check.
    #[serde(with = "humantime_serde")]
    pub readiness_poll: Duration,

    /// Ceiling on a compressed request body, in bytes.
    pub max_payload_bytes: usize,

    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Object fetches in flight at once while resolving a batch.
    pub resolve_concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_debounce: Duration::from_millis(1000),
            metadata_debounce: Duration::from_millis(750),
            reconnect_debounce: Duration::from_millis(1000),
            readiness_poll: Duration::from_millis(150),
            max_payload_bytes: MAX_PAYLOAD_BYTES,
            request_timeout: Duration::from_secs(30),
            resolve_concurrency: 8,
        }
    }
}

impl SyncConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `DX_STREAMS_*` variables (a `.env` file is
    /// honoured). Durations use humantime syntax, e.g. `750ms`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(value) = env_duration("DX_STREAMS_DATA_DEBOUNCE")? {
            self.data_debounce = value;
        }
        if let Some(value) = env_duration("DX_STREAMS_METADATA_DEBOUNCE")? {
            self.metadata_debounce = value;
        }
        if let Some(value) = env_duration("DX_STREAMS_RECONNECT_DEBOUNCE")? {
            self.reconnect_debounce = value;
        }
        if let Some(value) = env_duration("DX_STREAMS_READINESS_POLL")? {
            self.readiness_poll = value;
        }
        if let Some(value) = env_duration("DX_STREAMS_REQUEST_TIMEOUT")? {
            self.request_timeout = value;
        }
        if let Some(value) = env_usize("DX_STREAMS_MAX_PAYLOAD_BYTES")? {
            self.max_payload_bytes = value;
        }
        if let Some(value) = env_usize("DX_STREAMS_RESOLVE_CONCURRENCY")? {
            self.resolve_concurrency = value;
        }
        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), SyncError> {
        let intervals = [
            ("data_debounce", self.data_debounce),
            ("metadata_debounce", self.metadata_debounce),
            ("reconnect_debounce", self.reconnect_debounce),
            ("readiness_poll", self.readiness_poll),
            ("request_timeout", self.request_timeout),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(SyncError::Config(format!("{name} must be greater than zero")));
            }
        }
        if self.max_payload_bytes == 0 {
            return Err(SyncError::Config("max_payload_bytes must be greater than zero".into()));
        }
        if self.resolve_concurrency == 0 {
            return Err(SyncError::Config("resolve_concurrency must be at least 1".into()));
        }
        Ok(())
    }
}

fn env_duration(key: &str) -> Result<Option<Duration>> {
    match env::var(key) {
        Ok(raw) => humantime::parse_duration(raw.trim())
            .map(Some)
            .with_context(|| format!("{key} is not a duration: {raw:?}")),
        Err(_) => Ok(None),
    }
}

fn env_usize(key: &str) -> Result<Option<usize>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{key} is not a number: {raw:?}")),
        Err(_) => Ok(None),
    }
}

/// Where to connect and as whom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// REST endpoint, e.g. `https://streams.example.com/api`.
    pub rest_endpoint: String,
    pub token: String,
    /// Existing stream to attach to; senders create one when absent.
    pub stream_id: Option<String>,
}

impl ClientConfig {
    pub fn new(rest_endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            rest_endpoint: rest_endpoint.into(),
            token: token.into(),
            stream_id: None,
        }
    }

    pub fn with_stream(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = Some(stream_id.into());
        self
    }

    /// Loads `DX_STREAMS_SERVER`, `DX_STREAMS_TOKEN` and the optional
    /// `DX_STREAMS_STREAM_ID`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let rest_endpoint =
            env::var("DX_STREAMS_SERVER").context("DX_STREAMS_SERVER not set in .env")?;
        let token = env::var("DX_STREAMS_TOKEN").context("DX_STREAMS_TOKEN not set in .env")?;
        let stream_id = env::var("DX_STREAMS_STREAM_ID")
            .ok()
            .filter(|id| !id.is_empty());

        Ok(Self {
            rest_endpoint,
            token,
            stream_id,
        })
    }
}
