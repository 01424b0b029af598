//! Effective configuration from command-line flags

use std::collections::HashMap;

use contracts::{
    AccessLogConfig, AdmissionPolicy, CaptureOptions, QueueConfig, RenderFormat, SinkConfig,
    SinkType,
};

use crate::cli::{Admission, EventFormat, OutputArgs, UdpEncoding};
use crate::error::{CliError, Result};

pub const LOG_SINK: &str = "log";
pub const FILE_SINK: &str = "file";
pub const UDP_SINK: &str = "udp";

impl From<EventFormat> for RenderFormat {
    fn from(format: EventFormat) -> Self {
        match format {
            EventFormat::Common => RenderFormat::Common,
            EventFormat::Combined => RenderFormat::Combined,
            EventFormat::Json => RenderFormat::Json,
        }
    }
}

impl From<Admission> for AdmissionPolicy {
    fn from(admission: Admission) -> Self {
        match admission {
            Admission::Block => AdmissionPolicy::Block,
            Admission::DropNewest => AdmissionPolicy::DropNewest,
            Admission::DropOldest => AdmissionPolicy::DropOldest,
        }
    }
}

impl OutputArgs {
    /// Build and validate the configuration these flags describe.
    ///
    /// The log sink always runs inline; file and UDP sinks get a queue when
    /// `--queue-capacity` is given.
    pub fn to_config(&self) -> Result<AccessLogConfig> {
        let queue = self.queue_config()?;
        let format = RenderFormat::from(self.format);
        let mut sinks = Vec::new();

        if self.log_sink {
            sinks.push(SinkConfig {
                name: LOG_SINK.to_string(),
                sink_type: SinkType::Log,
                format,
                queue: None,
                params: HashMap::new(),
            });
        }

        if let Some(path) = &self.file {
            let path = path
                .to_str()
                .ok_or_else(|| CliError::invalid_argument("file", "path is not valid UTF-8"))?;
            sinks.push(SinkConfig {
                name: FILE_SINK.to_string(),
                sink_type: SinkType::File,
                format,
                queue,
                params: HashMap::from([("path".to_string(), path.to_string())]),
            });
        }

        if let Some(addr) = &self.udp {
            let encoding = match self.udp_encoding {
                UdpEncoding::Json => "json",
                UdpEncoding::Bincode => "bincode",
            };
            sinks.push(SinkConfig {
                name: UDP_SINK.to_string(),
                sink_type: SinkType::Network,
                format: RenderFormat::Json,
                queue,
                params: HashMap::from([
                    ("addr".to_string(), addr.clone()),
                    ("encoding".to_string(), encoding.to_string()),
                ]),
            });
        }

        let config = AccessLogConfig {
            capture: CaptureOptions {
                capture_body_parameters: self.capture_body,
                capture_request_content: self.capture_content,
                exclude_path_prefixes: self.exclude.clone(),
                ..CaptureOptions::default()
            },
            sinks,
            ..AccessLogConfig::default()
        };
        config.validate()?;
        Ok(config)
    }

    fn queue_config(&self) -> Result<Option<QueueConfig>> {
        let Some(capacity) = self.queue_capacity else {
            return Ok(None);
        };
        if capacity == 0 {
            return Err(CliError::invalid_argument(
                "queue-capacity",
                "capacity must be > 0",
            ));
        }
        Ok(Some(QueueConfig {
            capacity,
            admission: self.admission.into(),
            block_timeout_ms: self.block_timeout_ms,
            shutdown_deadline_ms: self.shutdown_deadline_ms,
        }))
    }
}
