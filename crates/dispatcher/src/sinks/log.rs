//! LogSink - emits rendered events via tracing

use contracts::{AccessSink, ContractError, RenderFormat, SharedEvent};
use tracing::{info, instrument};

use crate::render::{renderer_for, EventRenderer};

/// Sink that writes each event as an `info` record under `access_tap::access`
pub struct LogSink {
    name: String,
    renderer: Box<dyn EventRenderer>,
}

impl LogSink {
    /// Create a new LogSink rendering the combined format
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_format(name, RenderFormat::Combined)
    }

    pub fn with_format(name: impl Into<String>, format: RenderFormat) -> Self {
        Self {
            name: name.into(),
            renderer: renderer_for(format),
        }
    }
}

impl AccessSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, event: &SharedEvent) -> Result<(), ContractError> {
        let line = self.renderer.render(event);
        info!(
            target: "access_tap::access",
            sink = %self.name,
            status = event.status_code(),
            elapsed_ms = event.elapsed_millis(),
            "{line}"
        );
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    fn close(&self) -> Result<(), ContractError> {
        info!(sink = %self.name, "LogSink closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::mock::{self, MockRequest, MockResponse};
    use std::sync::Arc;

    #[test]
    fn test_log_sink_deliver() {
        let sink = LogSink::with_format("test_log", RenderFormat::Json);
        let event = Arc::new(mock::freeze(&mut MockRequest::get("/"), &MockResponse::ok(3)));

        assert!(sink.deliver(&event).is_ok());
        assert!(sink.close().is_ok());
    }

    #[test]
    fn test_log_sink_name() {
        let sink = LogSink::new("my_logger");
        assert_eq!(sink.name(), "my_logger");
    }
}
