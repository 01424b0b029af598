//! AccessLogConfig - capture options and sink routing
//!
//! Built programmatically or from CLI flags; serde derives let the effective
//! configuration be printed and shipped as JSON.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::ContractError;

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete access-log configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessLogConfig {
    #[serde(default)]
    pub version: ConfigVersion,

    /// What the freezer copies out of each exchange
    #[serde(default)]
    pub capture: CaptureOptions,

    /// Output routing, in dispatch order
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

/// Capture switches applied while freezing an exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureOptions {
    /// Decode `application/x-www-form-urlencoded` bodies into request parameters.
    ///
    /// Reading the body consumes it; only enable when the server buffers
    /// bodies before the application handler runs.
    #[serde(default)]
    pub capture_body_parameters: bool,

    /// Keep the request body text on the event
    #[serde(default)]
    pub capture_request_content: bool,

    /// Upper bound on captured body text (bytes)
    #[serde(default = "default_max_content_bytes")]
    pub max_content_bytes: usize,

    /// Use the server's reverse-resolved host name when it has one
    #[serde(default)]
    pub resolve_remote_host: bool,

    /// Requests whose URI starts with any of these prefixes produce no event
    #[serde(default)]
    pub exclude_path_prefixes: Vec<String>,
}

fn default_max_content_bytes() -> usize {
    8 * 1024
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            capture_body_parameters: false,
            capture_request_content: false,
            max_content_bytes: default_max_content_bytes(),
            resolve_remote_host: false,
            exclude_path_prefixes: Vec::new(),
        }
    }
}

impl CaptureOptions {
    /// Whether the body has to be read at all
    pub fn reads_body(&self) -> bool {
        self.capture_body_parameters || self.capture_request_content
    }

    /// Whether events for `uri` are suppressed
    pub fn is_excluded(&self, uri: &str) -> bool {
        self.exclude_path_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && uri.starts_with(prefix.as_str()))
    }
}

/// Sink output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Registry id, unique per hub
    pub name: String,

    pub sink_type: SinkType,

    /// How events are rendered to text
    #[serde(default)]
    pub format: RenderFormat,

    /// Wrap the sink in a bounded queue with its own worker
    #[serde(default)]
    pub queue: Option<QueueConfig>,

    /// Type-specific parameters (`path`, `addr`, ...)
    #[serde(default)]
    pub params: HashMap<String, String>,
}

/// Sink type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// Emit through `tracing`
    Log,
    /// Append lines to a file
    File,
    /// UDP datagrams
    Network,
    /// In-memory list (inspection and tests)
    List,
}

/// Rendering layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderFormat {
    /// NCSA common log format
    Common,
    /// NCSA combined log format (common + referer + user agent)
    #[default]
    Combined,
    /// One JSON object per event
    Json,
}

/// What a full queue does with a new event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// Caller waits up to the block timeout, then the delivery fails
    #[default]
    Block,
    /// Discard the incoming event
    DropNewest,
    /// Evict the queue head to admit the incoming event
    DropOldest,
}

/// Bounded queue settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,

    #[serde(default)]
    pub admission: AdmissionPolicy,

    /// Longest a caller waits under [`AdmissionPolicy::Block`]
    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: u64,

    /// Longest a clean shutdown keeps draining
    #[serde(default = "default_shutdown_deadline_ms")]
    pub shutdown_deadline_ms: u64,
}

fn default_queue_capacity() -> usize {
    256
}

fn default_block_timeout_ms() -> u64 {
    20
}

fn default_shutdown_deadline_ms() -> u64 {
    1000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            admission: AdmissionPolicy::default(),
            block_timeout_ms: default_block_timeout_ms(),
            shutdown_deadline_ms: default_shutdown_deadline_ms(),
        }
    }
}

impl QueueConfig {
    pub fn with_capacity(capacity: usize, admission: AdmissionPolicy) -> Self {
        Self {
            capacity,
            admission,
            ..Self::default()
        }
    }

    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms)
    }

    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_millis(self.shutdown_deadline_ms)
    }
}

impl AccessLogConfig {
    /// Check the configuration; returns the first problem found.
    pub fn validate(&self) -> Result<(), ContractError> {
        validate_sink_names(&self.sinks)?;
        for (idx, sink) in self.sinks.iter().enumerate() {
            validate_queue(idx, sink)?;
            validate_params(idx, sink)?;
        }
        Ok(())
    }
}

fn validate_sink_names(sinks: &[SinkConfig]) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, sink) in sinks.iter().enumerate() {
        if sink.name.trim().is_empty() {
            return Err(ContractError::config_validation(
                format!("sinks[{idx}].name"),
                "sink name cannot be empty",
            ));
        }
        if !seen.insert(sink.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("sinks[name={}]", sink.name),
                "duplicate sink name",
            ));
        }
    }
    Ok(())
}

fn validate_queue(idx: usize, sink: &SinkConfig) -> Result<(), ContractError> {
    if let Some(queue) = &sink.queue {
        if queue.capacity == 0 {
            return Err(ContractError::config_validation(
                format!("sinks[{idx}].queue.capacity"),
                "queue capacity must be > 0",
            ));
        }
    }
    Ok(())
}

fn validate_params(idx: usize, sink: &SinkConfig) -> Result<(), ContractError> {
    let required = match sink.sink_type {
        SinkType::File => Some("path"),
        SinkType::Network => Some("addr"),
        SinkType::Log | SinkType::List => None,
    };
    if let Some(key) = required {
        if sink.params.get(key).is_none_or(|v| v.trim().is_empty()) {
            return Err(ContractError::config_validation(
                format!("sinks[{idx}].params.{key}"),
                format!("{:?} sink requires '{key}'", sink.sink_type),
            ));
        }
    }
    Ok(())
}
