//! Layered error definitions
//!
//! Categorized by source: capture / sink / queue / hook / config

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Capture Errors =====
    /// A live request/response attribute could not be read
    #[error("capture error on '{field}': {message}")]
    Capture { field: String, message: String },

    // ===== Sink Errors =====
    /// Sink write error
    #[error("sink '{sink_name}' write error: {message}")]
    SinkWrite {
        sink_name: String,
        message: String,
        /// Whether a retry may succeed (e.g. a dropped connection)
        transient: bool,
    },

    /// Sink connection error
    #[error("sink '{sink_name}' connection error: {message}")]
    SinkConnection { sink_name: String, message: String },

    /// Sink panicked while delivering
    #[error("sink '{sink_name}' panicked: {message}")]
    SinkPanicked { sink_name: String, message: String },

    // ===== Queue Errors =====
    /// Bounded queue stayed full for the whole admission timeout
    #[error("queue for sink '{sink_name}' full after waiting {waited_ms}ms")]
    QueueFull { sink_name: String, waited_ms: u64 },

    /// Queue no longer accepts events
    #[error("queue for sink '{sink_name}' is closed")]
    QueueClosed { sink_name: String },

    // ===== Hook Errors =====
    /// Completion hook caught a panic
    #[error("completion hook panicked: {message}")]
    HookPanicked { message: String },

    // ===== Configuration Errors =====
    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create capture error
    pub fn capture(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Capture {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a permanent sink write error
    pub fn sink_write(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkWrite {
            sink_name: sink_name.into(),
            message: message.into(),
            transient: false,
        }
    }

    /// Create a sink write error that the sink's retry policy may retry
    pub fn sink_write_transient(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkWrite {
            sink_name: sink_name.into(),
            message: message.into(),
            transient: true,
        }
    }

    /// Create sink connection error
    pub fn sink_connection(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkConnection {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the same operation may succeed.
    ///
    /// Connection errors and interrupted/timed-out IO count as transient;
    /// everything else is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::SinkWrite { transient, .. } => *transient,
            Self::SinkConnection { .. } => true,
            Self::Io(e) => is_transient_io(e.kind()),
            _ => false,
        }
    }

    /// Sink write error for an I/O failure, transient when the kind is
    pub fn sink_io(sink_name: impl Into<String>, error: &std::io::Error) -> Self {
        Self::SinkWrite {
            sink_name: sink_name.into(),
            message: error.to_string(),
            transient: is_transient_io(error.kind()),
        }
    }
}

fn is_transient_io(kind: std::io::ErrorKind) -> bool {
    matches!(
        kind,
        std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionRefused
    )
}
