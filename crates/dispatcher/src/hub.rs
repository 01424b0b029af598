//! DispatchHub - fan-out of frozen events to registered sinks

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use contracts::{AccessLogConfig, AccessSink, ContractError, SharedEvent, SinkConfig, SinkId, SinkType};
use observability::StatusChannel;
use tracing::{debug, info, instrument, warn};

use crate::error::{panic_message, DispatcherError};
use crate::metrics::{MetricsSnapshot, QueueMetrics, QueueSnapshot, SinkMetrics};
use crate::queue::QueuedSink;
use crate::sinks::{FileSink, ListSink, LogSink, NetworkSink};

struct SinkEntry {
    id: SinkId,
    sink: Arc<dyn AccessSink>,
    metrics: Arc<SinkMetrics>,
    /// Set when the sink is a [`QueuedSink`] registered through `add_queued`
    queue: Option<Arc<QueueMetrics>>,
}

/// Outcome of one [`DispatchHub::dispatch`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Outcome of [`DispatchHub::shutdown`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub closed: usize,
    pub failed: usize,
}

/// Per-sink metrics row
#[derive(Debug, Clone)]
pub struct SinkReport {
    pub id: SinkId,
    pub sink: MetricsSnapshot,
    pub queue: Option<QueueSnapshot>,
}

/// Configuration phase of a [`DispatchHub`]
pub struct DispatchHubBuilder {
    entries: Vec<SinkEntry>,
    status: Arc<StatusChannel>,
}

impl Default for DispatchHubBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchHubBuilder {
    pub fn new() -> Self {
        Self::with_status(StatusChannel::shared())
    }

    /// Builder whose hub reports delivery failures to `status`
    pub fn with_status(status: Arc<StatusChannel>) -> Self {
        Self {
            entries: Vec::new(),
            status,
        }
    }

    pub fn status(&self) -> &Arc<StatusChannel> {
        &self.status
    }

    /// Register a sink and get back a typed handle to it
    pub fn add<S>(&mut self, id: impl Into<SinkId>, sink: S) -> Result<Arc<S>, DispatcherError>
    where
        S: AccessSink + 'static,
    {
        let sink = Arc::new(sink);
        self.insert(id.into(), Arc::clone(&sink) as Arc<dyn AccessSink>, None)?;
        Ok(sink)
    }

    /// Register an already shared sink
    pub fn add_shared(
        &mut self,
        id: impl Into<SinkId>,
        sink: Arc<dyn AccessSink>,
    ) -> Result<(), DispatcherError> {
        self.insert(id.into(), sink, None)
    }

    /// Register a queued sink; its queue metrics join the hub's snapshot
    pub fn add_queued(
        &mut self,
        id: impl Into<SinkId>,
        sink: QueuedSink,
    ) -> Result<Arc<QueuedSink>, DispatcherError> {
        let queue = Arc::clone(sink.metrics());
        let sink = Arc::new(sink);
        self.insert(
            id.into(),
            Arc::clone(&sink) as Arc<dyn AccessSink>,
            Some(queue),
        )?;
        Ok(sink)
    }

    /// Unregister a sink; the caller becomes responsible for closing it
    pub fn remove(&mut self, id: &str) -> Option<Arc<dyn AccessSink>> {
        let idx = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(idx).sink)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(
        &mut self,
        id: SinkId,
        sink: Arc<dyn AccessSink>,
        queue: Option<Arc<QueueMetrics>>,
    ) -> Result<(), DispatcherError> {
        if id.is_empty() {
            return Err(DispatcherError::EmptySinkId);
        }
        if self.contains(&id) {
            return Err(DispatcherError::DuplicateSink { id: id.to_string() });
        }

        debug!(sink = %id, "Sink registered");
        self.entries.push(SinkEntry {
            id,
            sink,
            metrics: Arc::new(SinkMetrics::new()),
            queue,
        });
        Ok(())
    }

    /// Freeze the registry
    #[instrument(name = "dispatch_hub_build", skip(self), fields(sink_count = self.entries.len()))]
    pub fn build(self) -> DispatchHub {
        info!(sinks = self.entries.len(), "DispatchHub built");
        DispatchHub {
            entries: self.entries,
            status: self.status,
        }
    }
}

/// Immutable fan-out registry
///
/// Share it as `Arc<DispatchHub>`; reconfiguring goes through
/// [`into_builder`](Self::into_builder).
pub struct DispatchHub {
    entries: Vec<SinkEntry>,
    status: Arc<StatusChannel>,
}

impl DispatchHub {
    pub fn builder() -> DispatchHubBuilder {
        DispatchHubBuilder::new()
    }

    /// Reopen configuration, keeping sinks and their metrics
    pub fn into_builder(self) -> DispatchHubBuilder {
        DispatchHubBuilder {
            entries: self.entries,
            status: self.status,
        }
    }

    /// Deliver `event` to every sink in registration order.
    ///
    /// Each delivery runs inside its own failure boundary: an error or a panic
    /// is recorded against that sink and the remaining sinks still run.
    pub fn dispatch(&self, event: &SharedEvent) -> DispatchReport {
        let mut report = DispatchReport::default();

        for entry in &self.entries {
            let outcome = catch_unwind(AssertUnwindSafe(|| entry.sink.deliver(event)))
                .unwrap_or_else(|payload| {
                    Err(ContractError::SinkPanicked {
                        sink_name: entry.id.to_string(),
                        message: panic_message(&*payload),
                    })
                });

            match outcome {
                Ok(()) => {
                    entry.metrics.inc_delivered_count();
                    observability::record_delivery(&entry.id, true);
                    report.delivered += 1;
                }
                Err(e) => {
                    entry.metrics.record_failure(&e);
                    observability::record_delivery(&entry.id, false);
                    self.status.error(&entry.id, format!("delivery failed: {e}"));
                    report.failed += 1;
                }
            }
        }

        report
    }

    pub fn status(&self) -> &Arc<StatusChannel> {
        &self.status
    }

    pub fn sink(&self, id: &str) -> Option<&Arc<dyn AccessSink>> {
        self.entry(id).map(|e| &e.sink)
    }

    pub fn metrics(&self, id: &str) -> Option<&Arc<SinkMetrics>> {
        self.entry(id).map(|e| &e.metrics)
    }

    /// Registered ids in dispatch order
    pub fn sink_ids(&self) -> Vec<&SinkId> {
        self.entries.iter().map(|e| &e.id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Metrics for all sinks
    pub fn metrics_snapshot(&self) -> Vec<SinkReport> {
        self.entries
            .iter()
            .map(|e| SinkReport {
                id: e.id.clone(),
                sink: e.metrics.snapshot(),
                queue: e.queue.as_ref().map(|q| q.snapshot()),
            })
            .collect()
    }

    /// Flush and close every sink in registration order
    #[instrument(name = "dispatch_hub_shutdown", skip(self), fields(sink_count = self.entries.len()))]
    pub fn shutdown(&self) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        for entry in &self.entries {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                entry.sink.flush()?;
                entry.sink.close()
            }))
            .unwrap_or_else(|payload| {
                Err(ContractError::SinkPanicked {
                    sink_name: entry.id.to_string(),
                    message: panic_message(&*payload),
                })
            });

            match outcome {
                Ok(()) => report.closed += 1,
                Err(e) => {
                    warn!(sink = %entry.id, error = %e, "Sink shutdown failed");
                    self.status.error(&entry.id, format!("shutdown failed: {e}"));
                    report.failed += 1;
                }
            }
        }

        info!(closed = report.closed, failed = report.failed, "DispatchHub shutdown complete");
        report
    }

    fn entry(&self, id: &str) -> Option<&SinkEntry> {
        self.entries.iter().find(|e| e.id == id)
    }
}

/// Create the sink described by `config`, without its queue
#[instrument(
    name = "dispatcher_create_sink",
    skip(config),
    fields(sink = %config.name, sink_type = ?config.sink_type)
)]
pub fn create_sink(config: &SinkConfig) -> Result<Arc<dyn AccessSink>, DispatcherError> {
    let creation = |e: ContractError| DispatcherError::sink_creation(&config.name, e.to_string());

    let sink: Arc<dyn AccessSink> = match config.sink_type {
        SinkType::Log => Arc::new(LogSink::with_format(&config.name, config.format)),
        SinkType::File => Arc::new(
            FileSink::from_params(&config.name, config.format, &config.params).map_err(creation)?,
        ),
        SinkType::Network => {
            Arc::new(NetworkSink::from_params(&config.name, &config.params).map_err(creation)?)
        }
        SinkType::List => Arc::new(ListSink::new(&config.name)),
    };
    Ok(sink)
}

/// Convenience function to create a hub from a configuration
///
/// Sinks with a `queue` section are wrapped in a [`QueuedSink`] reporting to `status`.
#[instrument(
    name = "dispatcher_create_hub",
    skip(config, status),
    fields(sink_count = config.sinks.len())
)]
pub fn create_hub(
    config: &AccessLogConfig,
    status: Arc<StatusChannel>,
) -> Result<DispatchHub, DispatcherError> {
    config.validate()?;

    let mut builder = DispatchHubBuilder::with_status(Arc::clone(&status));
    for sink_config in &config.sinks {
        let sink = create_sink(sink_config)?;
        let id = sink_config.name.as_str();
        match sink_config.queue {
            Some(queue) => {
                let queued = QueuedSink::spawn_with_status(id, sink, queue, Arc::clone(&status))?;
                builder.add_queued(id, queued)?;
            }
            None => builder.add_shared(id, sink)?,
        }
    }

    Ok(builder.build())
}
