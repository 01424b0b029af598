//! QueuedSink - decouples a slow sink from the request thread
//!
//! Callers enqueue into a bounded channel and return; one dedicated worker
//! thread drains it FIFO into the wrapped sink. What happens when the channel
//! is full is decided by the [`AdmissionPolicy`] fixed at construction.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use contracts::{AccessSink, AdmissionPolicy, ContractError, QueueConfig, SharedEvent, SinkId};
use crossbeam_channel::{
    select, Receiver, SendTimeoutError, Sender, TryRecvError, TrySendError,
};
use observability::StatusChannel;
use tracing::{debug, error, instrument, warn};

use crate::error::{panic_message, DispatcherError};
use crate::metrics::QueueMetrics;

/// A sink wrapped with a bounded mailbox and its own worker thread
pub struct QueuedSink {
    id: SinkId,
    config: QueueConfig,
    tx: Sender<SharedEvent>,
    /// Second receiver used to evict the head under `DropOldest`
    /// and to count stragglers after close
    evictor: Receiver<SharedEvent>,
    /// Carries the drain deadline; dropping it also stops the worker
    shutdown_tx: Mutex<Option<Sender<Instant>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    metrics: Arc<QueueMetrics>,
    status: Arc<StatusChannel>,
}

impl QueuedSink {
    /// Wrap `inner` and start its worker, reporting to a private status channel
    pub fn spawn<S>(
        id: impl Into<SinkId>,
        inner: S,
        config: QueueConfig,
    ) -> Result<Self, DispatcherError>
    where
        S: AccessSink + 'static,
    {
        Self::spawn_with_status(id, inner, config, StatusChannel::shared())
    }

    /// Wrap `inner` and start its worker
    #[instrument(
        name = "queued_sink_spawn",
        skip(id, inner, config, status),
        fields(sink = %inner.name(), capacity = config.capacity, admission = ?config.admission)
    )]
    pub fn spawn_with_status<S>(
        id: impl Into<SinkId>,
        inner: S,
        config: QueueConfig,
        status: Arc<StatusChannel>,
    ) -> Result<Self, DispatcherError>
    where
        S: AccessSink + 'static,
    {
        let id = id.into();
        let (tx, rx) = crossbeam_channel::bounded(config.capacity.max(1));
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let metrics = Arc::new(QueueMetrics::new());

        let worker = QueueWorker {
            id: id.clone(),
            inner,
            rx: rx.clone(),
            shutdown_rx,
            config,
            metrics: Arc::clone(&metrics),
            status: Arc::clone(&status),
        };

        let handle = thread::Builder::new()
            .name(format!("access-queue-{id}"))
            .spawn(move || worker.run())
            .map_err(|source| DispatcherError::WorkerSpawn {
                name: id.to_string(),
                source,
            })?;

        debug!(sink = %id, "Queue worker started");

        Ok(Self {
            id,
            config,
            tx,
            evictor: rx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            worker: Mutex::new(Some(handle)),
            closed: AtomicBool::new(false),
            metrics,
            status,
        })
    }

    pub fn id(&self) -> &SinkId {
        &self.id
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<QueueMetrics> {
        &self.metrics
    }

    /// Events waiting for the worker
    pub fn pending(&self) -> usize {
        self.tx.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn admitted(&self) -> Result<(), ContractError> {
        self.metrics.inc_enqueued();
        self.metrics.set_pending(self.tx.len());
        Ok(())
    }

    fn dropped(&self) {
        self.metrics.inc_dropped();
        observability::record_queue_drop(&self.id, policy_label(self.config.admission));
    }

    fn closed_error(&self) -> ContractError {
        ContractError::QueueClosed {
            sink_name: self.id.to_string(),
        }
    }

    fn admit_blocking(&self, event: SharedEvent) -> Result<(), ContractError> {
        match self.tx.send_timeout(event, self.config.block_timeout()) {
            Ok(()) => self.admitted(),
            Err(SendTimeoutError::Timeout(_)) => {
                self.dropped();
                Err(ContractError::QueueFull {
                    sink_name: self.id.to_string(),
                    waited_ms: self.config.block_timeout_ms,
                })
            }
            Err(SendTimeoutError::Disconnected(_)) => Err(self.closed_error()),
        }
    }

    fn admit_dropping_newest(&self, event: SharedEvent) -> Result<(), ContractError> {
        match self.tx.try_send(event) {
            Ok(()) => self.admitted(),
            Err(TrySendError::Full(_)) => {
                self.dropped();
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(self.closed_error()),
        }
    }

    fn admit_dropping_oldest(&self, mut event: SharedEvent) -> Result<(), ContractError> {
        loop {
            match self.tx.try_send(event) {
                Ok(()) => return self.admitted(),
                Err(TrySendError::Full(back)) => {
                    // The worker may win the race for the head; then just retry
                    if self.evictor.try_recv().is_ok() {
                        self.dropped();
                    }
                    event = back;
                }
                Err(TrySendError::Disconnected(_)) => return Err(self.closed_error()),
            }
        }
    }
}

impl AccessSink for QueuedSink {
    fn name(&self) -> &str {
        &self.id
    }

    fn deliver(&self, event: &SharedEvent) -> Result<(), ContractError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        let event = SharedEvent::clone(event);
        match self.config.admission {
            AdmissionPolicy::Block => self.admit_blocking(event),
            AdmissionPolicy::DropNewest => self.admit_dropping_newest(event),
            AdmissionPolicy::DropOldest => self.admit_dropping_oldest(event),
        }
    }

    /// Stop admitting, drain until empty or the shutdown deadline, then
    /// flush and close the wrapped sink. Idempotent.
    #[instrument(name = "queued_sink_close", skip(self), fields(sink = %self.id))]
    fn close(&self) -> Result<(), ContractError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let deadline = Instant::now() + self.config.shutdown_deadline();
        if let Some(shutdown_tx) = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = shutdown_tx.send(deadline);
        }

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!(sink = %self.id, "Queue worker panicked");
                return Err(ContractError::SinkPanicked {
                    sink_name: self.id.to_string(),
                    message: "queue worker panicked".to_string(),
                });
            }
        }

        // Events admitted concurrently with close, after the worker stopped
        let stragglers = self.evictor.try_iter().count() as u64;
        if stragglers > 0 {
            self.metrics.add_abandoned(stragglers);
            self.status.warn(
                &self.id,
                format!("{stragglers} event(s) admitted during close were abandoned"),
            );
        }
        self.metrics.set_pending(0);

        debug!(sink = %self.id, metrics = ?self.metrics.snapshot(), "QueuedSink closed");
        Ok(())
    }
}

impl Drop for QueuedSink {
    fn drop(&mut self) {
        // Without close: worker drains to the deadline and exits on its own
        self.closed.store(true, Ordering::Release);
        self.shutdown_tx
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

fn policy_label(policy: AdmissionPolicy) -> &'static str {
    match policy {
        AdmissionPolicy::Block => "block",
        AdmissionPolicy::DropNewest => "drop_newest",
        AdmissionPolicy::DropOldest => "drop_oldest",
    }
}

enum Step {
    Deliver(SharedEvent),
    Stop(Option<Instant>),
}

/// State owned by the worker thread
struct QueueWorker<S> {
    id: SinkId,
    inner: S,
    rx: Receiver<SharedEvent>,
    shutdown_rx: Receiver<Instant>,
    config: QueueConfig,
    metrics: Arc<QueueMetrics>,
    status: Arc<StatusChannel>,
}

impl<S: AccessSink> QueueWorker<S> {
    fn run(self) {
        debug!(sink = %self.id, "Queue worker running");

        let deadline = loop {
            // Shutdown takes priority over queued events
            match self.shutdown_rx.try_recv() {
                Ok(deadline) => break Some(deadline),
                Err(TryRecvError::Disconnected) => break Some(self.default_deadline()),
                Err(TryRecvError::Empty) => {}
            }

            let step = select! {
                recv(self.rx) -> msg => match msg {
                    Ok(event) => Step::Deliver(event),
                    // Every sender is gone and the queue is empty
                    Err(_) => Step::Stop(None),
                },
                recv(self.shutdown_rx) -> msg => {
                    Step::Stop(Some(msg.unwrap_or_else(|_| self.default_deadline())))
                }
            };

            match step {
                Step::Deliver(event) => self.process(&event),
                Step::Stop(deadline) => break deadline,
            }
        };

        if let Some(deadline) = deadline {
            self.drain_until(deadline);
        }

        self.finish();
    }

    fn default_deadline(&self) -> Instant {
        Instant::now() + self.config.shutdown_deadline()
    }

    fn drain_until(&self, deadline: Instant) {
        while Instant::now() < deadline {
            match self.rx.try_recv() {
                Ok(event) => self.process(&event),
                Err(_) => return,
            }
        }

        let abandoned = self.rx.try_iter().count() as u64;
        if abandoned > 0 {
            self.metrics.add_abandoned(abandoned);
            warn!(sink = %self.id, abandoned, "Shutdown deadline reached with events queued");
            self.status.warn(
                &self.id,
                format!("shutdown deadline reached, {abandoned} queued event(s) abandoned"),
            );
        }
    }

    /// Deliver one event, retrying transient failures as the sink's policy allows
    fn process(&self, event: &SharedEvent) {
        let policy = self.inner.retry_policy();
        let mut attempt: u32 = 1;

        loop {
            let outcome = catch_unwind(AssertUnwindSafe(|| self.inner.deliver(event)))
                .unwrap_or_else(|payload| {
                    Err(ContractError::SinkPanicked {
                        sink_name: self.id.to_string(),
                        message: panic_message(&*payload),
                    })
                });

            match outcome {
                Ok(()) => {
                    self.metrics.inc_delivered();
                    observability::record_delivery(&self.id, true);
                    break;
                }
                Err(e) if policy.allows_retry_after(attempt, &e) => {
                    self.metrics.inc_retried();
                    debug!(sink = %self.id, attempt, error = %e, "Retrying delivery");
                    thread::sleep(policy.backoff());
                    attempt += 1;
                }
                Err(e) => {
                    self.metrics.inc_failed();
                    observability::record_delivery(&self.id, false);
                    self.status.error(
                        &self.id,
                        format!("delivery failed after {attempt} attempt(s): {e}"),
                    );
                    break;
                }
            }
        }

        let pending = self.rx.len();
        self.metrics.set_pending(pending);
        observability::record_queue_depth(&self.id, pending);
    }

    fn finish(&self) {
        if let Err(e) = self.inner.flush() {
            self.status.error(&self.id, format!("flush failed on shutdown: {e}"));
        }
        if let Err(e) = self.inner.close() {
            self.status.error(&self.id, format!("close failed on shutdown: {e}"));
        }
        debug!(sink = %self.id, "Queue worker stopped");
    }
}
