//! AccessHook - the server's completion callback
//!
//! Runs synchronously on the request thread: capture, freeze, dispatch.
//! Whatever goes wrong in here is counted and reported on the status channel;
//! the server only ever sees a normal return.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use contracts::{
    CaptureIssue, CaptureOptions, ContractError, EventFreezer, ExchangeTiming, LiveRequest,
    LiveResponse, SharedEvent,
};
use dispatcher::{panic_message, DispatchHub, DispatchReport};
use observability::{StatusChannel, StatusLevel};
use tracing::{info, instrument};

const ORIGIN: &str = "hook";

/// What one hook invocation did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// Event frozen and handed to the hub
    Dispatched(DispatchReport),
    /// Request path matched an exclusion prefix
    Filtered,
    /// Hook switched off
    Disabled,
    /// Capture or dispatch panicked; reported on the status channel
    Failed,
}

/// Hook counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookSnapshot {
    pub captured: u64,
    pub filtered: u64,
    pub failed: u64,
}

/// Completion hook that freezes each finished exchange and fans it out
pub struct AccessHook {
    freezer: EventFreezer,
    hub: Arc<DispatchHub>,
    status: Arc<StatusChannel>,
    enabled: AtomicBool,
    captured: AtomicU64,
    filtered: AtomicU64,
    failed: AtomicU64,
}

impl AccessHook {
    /// Hook reporting to the hub's status channel
    pub fn new(options: CaptureOptions, hub: Arc<DispatchHub>) -> Self {
        let status = Arc::clone(hub.status());
        Self::with_status(options, hub, status)
    }

    #[instrument(name = "access_hook_new", skip_all, fields(sinks = hub.len()))]
    pub fn with_status(
        options: CaptureOptions,
        hub: Arc<DispatchHub>,
        status: Arc<StatusChannel>,
    ) -> Self {
        info!(
            body_parameters = options.capture_body_parameters,
            request_content = options.capture_request_content,
            excluded_prefixes = options.exclude_path_prefixes.len(),
            "AccessHook ready"
        );
        Self {
            freezer: EventFreezer::new(options),
            hub,
            status,
            enabled: AtomicBool::new(true),
            captured: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn hub(&self) -> &Arc<DispatchHub> {
        &self.hub
    }

    pub fn status(&self) -> &Arc<StatusChannel> {
        &self.status
    }

    pub fn options(&self) -> &CaptureOptions {
        self.freezer.options()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Switch capture on or off; a disabled hook returns immediately
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        self.status.info(
            ORIGIN,
            if enabled { "capture enabled" } else { "capture disabled" },
        );
    }

    pub fn snapshot(&self) -> HookSnapshot {
        HookSnapshot {
            captured: self.captured.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Called by the server exactly once per finished request.
    ///
    /// Returns after the event is frozen and every non-queued sink has run,
    /// so `request` and `response` may be recycled as soon as this returns.
    pub fn on_request_complete(
        &self,
        request: &mut dyn LiveRequest,
        response: &dyn LiveResponse,
        timing: ExchangeTiming,
    ) -> HookOutcome {
        if !self.is_enabled() {
            observability::record_event_filtered("disabled");
            return HookOutcome::Disabled;
        }

        let attempt = catch_unwind(AssertUnwindSafe(|| {
            self.capture_and_dispatch(request, response, timing)
        }));

        match attempt {
            Ok(outcome) => outcome,
            Err(payload) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                observability::record_hook_failure("panic");
                let error = ContractError::HookPanicked {
                    message: panic_message(&*payload),
                };
                self.status.error(ORIGIN, error.to_string());
                HookOutcome::Failed
            }
        }
    }

    fn capture_and_dispatch(
        &self,
        request: &mut dyn LiveRequest,
        response: &dyn LiveResponse,
        timing: ExchangeTiming,
    ) -> HookOutcome {
        if self.freezer.options().is_excluded(request.request_uri()) {
            self.filtered.fetch_add(1, Ordering::Relaxed);
            observability::record_event_filtered("path");
            return HookOutcome::Filtered;
        }

        let freeze_started = Instant::now();
        let live = self.freezer.capture(request, response, timing);
        let (event, issues) = self.freezer.freeze_reporting(live);
        observability::record_freeze_latency_us(freeze_started.elapsed().as_secs_f64() * 1e6);

        for issue in &issues {
            self.status.report(
                issue_level(issue),
                ORIGIN,
                format!(
                    "{issue} ({} {})",
                    event.method(),
                    event.request_uri()
                ),
            );
        }

        self.captured.fetch_add(1, Ordering::Relaxed);
        observability::record_event_captured(&event);

        let event: SharedEvent = Arc::new(event);
        HookOutcome::Dispatched(self.hub.dispatch(&event))
    }
}

fn issue_level(issue: &CaptureIssue) -> StatusLevel {
    match issue {
        // Client went away; expected under load
        CaptureIssue::ResponseNotCommitted => StatusLevel::Info,
        _ => StatusLevel::Warn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use contracts::mock::{MockRequest, MockResponse};
    use dispatcher::{DispatchHubBuilder, ListSink};

    fn hook_with_list(options: CaptureOptions) -> (AccessHook, Arc<ListSink>) {
        let mut builder = DispatchHubBuilder::new();
        let list = builder.add("list", ListSink::new("list")).unwrap();
        (AccessHook::new(options, Arc::new(builder.build())), list)
    }

    fn timing() -> ExchangeTiming {
        ExchangeTiming::start().finish()
    }

    #[test]
    fn test_event_survives_recycling() {
        let (hook, list) = hook_with_list(CaptureOptions::default());
        let mut request = MockRequest::get("/foo/bar?param1=value1").header("X-Trace", "t-1");
        let mut response = MockResponse::ok(128).header("Content-Type", "text/plain");

        let outcome = hook.on_request_complete(&mut request, &response, timing());
        request.recycle();
        response.recycle();

        assert_eq!(
            outcome,
            HookOutcome::Dispatched(DispatchReport { delivered: 1, failed: 0 })
        );
        let event = &list.events()[0];
        assert_eq!(event.request_uri(), "/foo/bar");
        assert_eq!(event.query_string(), "?param1=value1");
        assert_eq!(event.request_header("x-trace"), Some("t-1"));
        assert_eq!(event.response_header("content-type"), Some("text/plain"));
        assert_eq!(event.content_length(), 128);
        assert_eq!(hook.snapshot().captured, 1);
    }

    struct ExplodingRequest;

    impl LiveRequest for ExplodingRequest {
        fn method(&self) -> &str {
            panic!("request object already recycled");
        }

        fn request_uri(&self) -> &str {
            "/"
        }

        fn query(&self) -> Option<&str> {
            None
        }

        fn protocol(&self) -> &str {
            "HTTP/1.1"
        }

        fn remote_addr(&self) -> Option<String> {
            None
        }

        fn server_name(&self) -> Option<&str> {
            None
        }

        fn visit_headers(&self, _visitor: &mut dyn FnMut(&str, &str)) {}

        fn take_body(&mut self) -> Result<Option<Bytes>, ContractError> {
            Ok(None)
        }
    }

    #[test]
    fn test_panic_in_capture_is_contained() {
        let (hook, list) = hook_with_list(CaptureOptions::default());

        let outcome = hook.on_request_complete(&mut ExplodingRequest, &MockResponse::ok(0), timing());

        assert_eq!(outcome, HookOutcome::Failed);
        assert!(list.is_empty());
        assert_eq!(hook.snapshot().failed, 1);
        let records = hook.status().records_from("hook");
        assert!(records
            .iter()
            .any(|r| r.level == StatusLevel::Error && r.message.contains("already recycled")));
    }

    #[test]
    fn test_disabled_hook_does_nothing() {
        let (hook, list) = hook_with_list(CaptureOptions::default());
        hook.set_enabled(false);

        let outcome = hook.on_request_complete(&mut MockRequest::get("/"), &MockResponse::ok(0), timing());
        assert_eq!(outcome, HookOutcome::Disabled);
        assert!(list.is_empty());

        hook.set_enabled(true);
        hook.on_request_complete(&mut MockRequest::get("/"), &MockResponse::ok(0), timing());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_excluded_paths_are_filtered() {
        let options = CaptureOptions {
            exclude_path_prefixes: vec!["/health".to_string()],
            ..CaptureOptions::default()
        };
        let (hook, list) = hook_with_list(options);

        let outcome =
            hook.on_request_complete(&mut MockRequest::get("/healthz"), &MockResponse::ok(0), timing());
        hook.on_request_complete(&mut MockRequest::get("/api"), &MockResponse::ok(0), timing());

        assert_eq!(outcome, HookOutcome::Filtered);
        assert_eq!(list.len(), 1);
        assert_eq!(hook.snapshot(), HookSnapshot { captured: 1, filtered: 1, failed: 0 });
    }

    #[test]
    fn test_consumed_body_warns_on_status_channel() {
        let options = CaptureOptions {
            capture_body_parameters: true,
            ..CaptureOptions::default()
        };
        let (hook, list) = hook_with_list(options);
        let mut request =
            MockRequest::post("/login", "application/x-www-form-urlencoded", "user=bob");
        request.consume_body();

        hook.on_request_complete(&mut request, &MockResponse::ok(0), timing());

        assert!(list.events()[0].request_parameter("user").is_empty());
        let warnings = hook.status().records_from("hook");
        assert!(warnings
            .iter()
            .any(|r| r.level == StatusLevel::Warn && r.message.contains("POST /login")));
    }

    #[test]
    fn test_uncommitted_response_is_captured_with_sentinels() {
        let (hook, list) = hook_with_list(CaptureOptions::default());

        hook.on_request_complete(&mut MockRequest::get("/abort"), &MockResponse::uncommitted(), timing());

        let event = &list.events()[0];
        assert_eq!(event.status_code(), 0);
        assert_eq!(event.content_length(), -1);
        assert_eq!(hook.status().count(StatusLevel::Info), 1);
    }
}
