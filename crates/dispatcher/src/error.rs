//! Dispatcher error types

use std::any::Any;

use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Sink creation error
    #[error("failed to create sink '{name}': {message}")]
    SinkCreation { name: String, message: String },

    /// Sink id already registered
    #[error("sink '{id}' is already registered")]
    DuplicateSink { id: String },

    /// Sink id empty or blank
    #[error("sink id cannot be empty")]
    EmptySinkId,

    /// Queue worker thread could not be started
    #[error("failed to start queue worker for sink '{name}': {source}")]
    WorkerSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Sink write error (from contract)
    #[error("sink error: {0}")]
    Contract(#[from] contracts::ContractError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatcherError {
    /// Create a sink creation error
    pub fn sink_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkCreation {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Best-effort text of a caught panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
