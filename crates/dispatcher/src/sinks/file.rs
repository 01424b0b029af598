//! FileSink - appends rendered events to a file, one per line

use contracts::{AccessSink, ContractError, RenderFormat, SharedEvent};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, instrument};

use crate::render::{renderer_for, EventRenderer};

/// Configuration for FileSink
#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    /// Output file
    pub path: PathBuf,
    /// Line layout
    pub format: RenderFormat,
    /// Flush after every event instead of when the buffer fills
    pub immediate_flush: bool,
    /// Keep existing content (otherwise truncate on open)
    pub append: bool,
}

impl FileSinkConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            format: RenderFormat::default(),
            immediate_flush: true,
            append: true,
        }
    }

    /// Create config from params map
    pub fn from_params(
        format: RenderFormat,
        params: &HashMap<String, String>,
    ) -> Result<Self, String> {
        let path = params
            .get("path")
            .map(PathBuf::from)
            .ok_or_else(|| "missing 'path' parameter".to_string())?;

        let immediate_flush = parse_flag(params, "immediate_flush", true)?;
        let append = parse_flag(params, "append", true)?;

        Ok(Self {
            path,
            format,
            immediate_flush,
            append,
        })
    }
}

fn parse_flag(params: &HashMap<String, String>, key: &str, default: bool) -> Result<bool, String> {
    match params.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| format!("invalid '{key}' value '{raw}', expected true or false")),
    }
}

/// Sink that appends event lines to a file
pub struct FileSink {
    name: String,
    config: FileSinkConfig,
    renderer: Box<dyn EventRenderer>,
    /// `None` once closed
    writer: Mutex<Option<BufWriter<File>>>,
}

impl FileSink {
    /// Create a new FileSink, creating parent directories as needed
    pub fn new(name: impl Into<String>, config: FileSinkConfig) -> std::io::Result<Self> {
        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(config.append)
            .truncate(!config.append)
            .open(&config.path)?;

        Ok(Self {
            name: name.into(),
            renderer: renderer_for(config.format),
            config,
            writer: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    /// Create from params map (for factory)
    pub fn from_params(
        name: impl Into<String>,
        format: RenderFormat,
        params: &HashMap<String, String>,
    ) -> Result<Self, ContractError> {
        let name = name.into();
        let config = FileSinkConfig::from_params(format, params)
            .map_err(|e| ContractError::config_validation(format!("sinks[name={name}]"), e))?;
        Self::new(name.as_str(), config).map_err(|e| ContractError::sink_io(&name, &e))
    }

    pub fn path(&self) -> &std::path::Path {
        &self.config.path
    }

    fn write_line(&self, line: &str) -> Result<(), ContractError> {
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let writer = guard
            .as_mut()
            .ok_or_else(|| ContractError::sink_write(&self.name, "file sink is closed"))?;

        writeln!(writer, "{line}").map_err(|e| ContractError::sink_io(&self.name, &e))?;
        if self.config.immediate_flush {
            writer
                .flush()
                .map_err(|e| ContractError::sink_io(&self.name, &e))?;
        }
        Ok(())
    }
}

impl AccessSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, event: &SharedEvent) -> Result<(), ContractError> {
        let line = self.renderer.render(event);
        self.write_line(&line)
    }

    #[instrument(name = "file_sink_flush", skip(self), fields(sink = %self.name))]
    fn flush(&self) -> Result<(), ContractError> {
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(writer) = guard.as_mut() {
            writer
                .flush()
                .map_err(|e| ContractError::sink_io(&self.name, &e))?;
        }
        Ok(())
    }

    #[instrument(name = "file_sink_close", skip(self), fields(sink = %self.name))]
    fn close(&self) -> Result<(), ContractError> {
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut writer) = writer {
            writer
                .flush()
                .map_err(|e| ContractError::sink_io(&self.name, &e))?;
        }
        debug!(sink = %self.name, path = %self.config.path.display(), "FileSink closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::mock::{self, MockRequest, MockResponse};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn event(uri: &str) -> SharedEvent {
        Arc::new(mock::freeze(&mut MockRequest::get(uri), &MockResponse::ok(10)))
    }

    #[test]
    fn test_file_sink_appends_lines() {
        let dir = tempdir().unwrap();
        let mut config = FileSinkConfig::new(dir.path().join("logs/access.log"));
        config.format = RenderFormat::Common;

        let sink = FileSink::new("test_file", config).unwrap();
        sink.deliver(&event("/a")).unwrap();
        sink.deliver(&event("/b")).unwrap();
        sink.close().unwrap();

        let content = fs::read_to_string(dir.path().join("logs/access.log")).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"GET /a HTTP/1.1\" 200 10"));
        assert!(lines[1].contains("\"GET /b HTTP/1.1\""));
    }

    #[test]
    fn test_buffered_lines_land_on_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("access.log");
        let mut config = FileSinkConfig::new(&path);
        config.immediate_flush = false;

        let sink = FileSink::new("buffered", config).unwrap();
        sink.deliver(&event("/late")).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "");

        sink.flush().unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("/late"));
    }

    #[test]
    fn test_deliver_after_close_fails() {
        let dir = tempdir().unwrap();
        let sink = FileSink::new("closed", FileSinkConfig::new(dir.path().join("x.log"))).unwrap();
        sink.close().unwrap();

        let err = sink.deliver(&event("/")).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_from_params_requires_path() {
        let params = HashMap::new();
        assert!(FileSink::from_params("f", RenderFormat::Json, &params).is_err());

        let params = HashMap::from([("immediate_flush".to_string(), "maybe".to_string())]);
        assert!(FileSinkConfig::from_params(RenderFormat::Json, &params).is_err());
    }
}
