//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 事件冻结契约（快照隔离、URL 合成、哨兵值）
//! - hook -> hub -> sink 全链路 e2e 测试
//! - 有界队列准入策略与关闭排空

#[cfg(test)]
mod support {
    use std::sync::Arc;
    use std::time::Duration;

    use capture::AccessHook;
    use contracts::{
        AccessSink, AdmissionPolicy, CaptureOptions, ContractError, ExchangeTiming, QueueConfig,
        SharedEvent,
    };
    use crossbeam_channel::{Receiver, Sender};
    use dispatcher::{DispatchHubBuilder, ListSink, QueuedSink};

    pub fn timing() -> ExchangeTiming {
        ExchangeTiming::start().finish()
    }

    pub fn hook_with_list(options: CaptureOptions) -> (AccessHook, Arc<ListSink>) {
        let mut builder = DispatchHubBuilder::new();
        let list = builder.add("list", ListSink::new("list")).unwrap();
        (AccessHook::new(options, Arc::new(builder.build())), list)
    }

    pub fn uris(list: &ListSink) -> Vec<String> {
        list.events()
            .iter()
            .map(|e| e.request_uri().to_string())
            .collect()
    }

    pub struct FailingSink;

    impl AccessSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        fn deliver(&self, _event: &SharedEvent) -> Result<(), ContractError> {
            Err(ContractError::sink_write("failing", "disk full"))
        }
    }

    pub struct PanickingSink;

    impl AccessSink for PanickingSink {
        fn name(&self) -> &str {
            "panicking"
        }

        fn deliver(&self, _event: &SharedEvent) -> Result<(), ContractError> {
            panic!("renderer bug");
        }
    }

    /// Sink that parks inside `deliver` until the gate opens
    pub struct GateSink {
        list: Arc<ListSink>,
        entered: Sender<()>,
        release: Receiver<()>,
    }

    impl AccessSink for GateSink {
        fn name(&self) -> &str {
            "gate"
        }

        fn deliver(&self, event: &SharedEvent) -> Result<(), ContractError> {
            let _ = self.entered.send(());
            let _ = self.release.recv();
            self.list.deliver(event)
        }
    }

    pub struct Gate {
        pub list: Arc<ListSink>,
        entered: Receiver<()>,
        release: Option<Sender<()>>,
    }

    impl Gate {
        pub fn wait_entered(&self) {
            self.entered.recv_timeout(Duration::from_secs(2)).unwrap();
        }

        pub fn open(&mut self) {
            self.release.take();
        }
    }

    pub fn gated_queue(id: &str, capacity: usize, admission: AdmissionPolicy) -> (QueuedSink, Gate) {
        let list = Arc::new(ListSink::new("gated"));
        let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
        let (release_tx, release_rx) = crossbeam_channel::bounded(0);
        let sink = GateSink {
            list: Arc::clone(&list),
            entered: entered_tx,
            release: release_rx,
        };
        let config = QueueConfig {
            block_timeout_ms: 30,
            ..QueueConfig::with_capacity(capacity, admission)
        };
        let queued = QueuedSink::spawn(id, sink, config).unwrap();
        let gate = Gate {
            list,
            entered: entered_rx,
            release: Some(release_tx),
        };
        (queued, gate)
    }
}

#[cfg(test)]
mod contract_tests {
    use super::support::{hook_with_list, timing};
    use capture::HookOutcome;
    use contracts::mock::{MockRequest, MockResponse};
    use contracts::CaptureOptions;

    #[test]
    fn test_get_with_query_scenario() {
        let (hook, list) = hook_with_list(CaptureOptions::default());
        let mut request = MockRequest::get("/foo/bar")
            .query("param1=value1")
            .server_name("localhost");

        hook.on_request_complete(&mut request, &MockResponse::ok(11), timing());

        let events = list.events();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.remote_addr(), "127.0.0.1");
        assert_eq!(event.server_name(), "localhost");
        assert_eq!(event.request_uri(), "/foo/bar");
        assert_eq!(event.query_string(), "?param1=value1");
        assert_eq!(event.request_url(), "GET /foo/bar?param1=value1 HTTP/1.1");
        assert_eq!(event.session_id(), "-");
        assert_eq!(event.status_code(), 200);
        assert_eq!(event.content_length(), 11);
    }

    #[test]
    fn test_request_url_synthesis() {
        let (hook, list) = hook_with_list(CaptureOptions::default());
        let cases = [
            (MockRequest::get("/"), "GET / HTTP/1.1"),
            (MockRequest::get("/a").query("x=1&y=2"), "GET /a?x=1&y=2 HTTP/1.1"),
            (
                MockRequest::new("DELETE", "/items/7").protocol("HTTP/2.0"),
                "DELETE /items/7 HTTP/2.0",
            ),
            (
                MockRequest::post("/form", "text/plain", "hello"),
                "POST /form HTTP/1.1",
            ),
        ];

        for (mut request, _) in cases.clone() {
            hook.on_request_complete(&mut request, &MockResponse::ok(0), timing());
        }

        let urls: Vec<_> = list.events().iter().map(|e| e.request_url()).collect();
        let expected: Vec<_> = cases.iter().map(|(_, url)| url.to_string()).collect();
        assert_eq!(urls, expected);
        assert!(list.events().iter().all(|e| e.query_string().is_empty()
            || e.query_string().starts_with('?')));
    }

    #[test]
    fn test_frozen_event_is_isolated_from_recycling() {
        let (hook, list) = hook_with_list(CaptureOptions::default());
        let mut request = MockRequest::get("/orders")
            .query("id=1")
            .session("s-42")
            .header("X-Request-Id", "r-1");
        let mut response = MockResponse::new(201, 5).header("Location", "/orders/1");

        hook.on_request_complete(&mut request, &response, timing());
        request.recycle();
        response.recycle();

        // The recycled objects now serve a different request
        let mut reused = request.clone();
        hook.on_request_complete(&mut reused, &response, timing());

        let first = &list.events()[0];
        assert_eq!(first.request_url(), "GET /orders?id=1 HTTP/1.1");
        assert_eq!(first.session_id(), "s-42");
        assert_eq!(first.request_header("x-request-id"), Some("r-1"));
        assert_eq!(first.response_header("location"), Some("/orders/1"));
        assert_eq!(first.status_code(), 201);
        assert_eq!(first.content_length(), 5);
        assert_ne!(list.events()[1].request_url(), first.request_url());
    }

    #[test]
    fn test_body_parameters_require_opt_in() {
        let post = || MockRequest::post("/submit", "application/x-www-form-urlencoded", "a=1&b=2");

        let (plain, plain_list) = hook_with_list(CaptureOptions::default());
        plain.on_request_complete(&mut post(), &MockResponse::ok(0), timing());
        assert!(plain_list.events()[0].request_parameters().is_empty());

        let options = CaptureOptions {
            capture_body_parameters: true,
            ..CaptureOptions::default()
        };
        let (capturing, list) = hook_with_list(options);
        capturing.on_request_complete(&mut post(), &MockResponse::ok(0), timing());

        let event = &list.events()[0];
        assert_eq!(event.query_string(), "");
        assert_eq!(event.request_parameter("a"), ["1"]);
        assert_eq!(event.request_parameter("b"), ["2"]);
        assert_eq!(event.request_parameters().len(), 2);
    }

    #[test]
    fn test_headers_are_case_insensitive_and_ordered() {
        let (hook, list) = hook_with_list(CaptureOptions::default());
        let mut request = MockRequest::get("/")
            .header("Accept", "text/html")
            .header("ACCEPT", "application/json")
            .header("accept", "*/*");

        hook.on_request_complete(&mut request, &MockResponse::ok(0), timing());

        let event = &list.events()[0];
        assert_eq!(
            event.request_headers().get("Accept").unwrap(),
            ["text/html", "application/json", "*/*"]
        );
        assert_eq!(event.request_header("aCcEpT"), Some("text/html"));
    }

    #[test]
    fn test_exactly_one_event_per_request() {
        let (hook, list) = hook_with_list(CaptureOptions::default());
        for i in 0..25 {
            let outcome = hook.on_request_complete(
                &mut MockRequest::get(&format!("/r/{i}")),
                &MockResponse::ok(i),
                timing(),
            );
            assert!(matches!(outcome, HookOutcome::Dispatched(_)));
        }
        assert_eq!(list.len(), 25);
        assert_eq!(hook.snapshot().captured, 25);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::net::UdpSocket;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::support::{gated_queue, hook_with_list, timing, uris, FailingSink, PanickingSink};
    use capture::{AccessHook, HookOutcome, HttpRequest, HttpResponse};
    use contracts::mock::{MockRequest, MockResponse};
    use contracts::{
        AccessLogConfig, AdmissionPolicy, CaptureOptions, QueueConfig, RenderFormat, SinkConfig,
        SinkType,
    };
    use dispatcher::{DispatchHubBuilder, DispatchReport, ListSink, QueuedSink};
    use observability::{StatusChannel, StatusLevel};

    /// One failing and one panicking sink among four; the healthy two still get every event
    #[test]
    fn test_fan_out_isolates_failing_sinks() {
        let mut builder = DispatchHubBuilder::new();
        let first = builder.add("first", ListSink::new("first")).unwrap();
        builder.add("failing", FailingSink).unwrap();
        builder.add("panicking", PanickingSink).unwrap();
        let last = builder.add("last", ListSink::new("last")).unwrap();
        let hub = Arc::new(builder.build());
        let hook = AccessHook::new(CaptureOptions::default(), Arc::clone(&hub));

        for _ in 0..3 {
            let outcome =
                hook.on_request_complete(&mut MockRequest::get("/"), &MockResponse::ok(1), timing());
            assert_eq!(
                outcome,
                HookOutcome::Dispatched(DispatchReport { delivered: 2, failed: 2 })
            );
        }

        assert_eq!(first.len(), 3);
        assert_eq!(last.len(), 3);
        assert_eq!(hub.metrics("failing").unwrap().snapshot().failure_count, 3);
        assert_eq!(hub.metrics("panicking").unwrap().snapshot().failure_count, 3);
        assert!(hub
            .metrics("panicking")
            .unwrap()
            .last_error()
            .unwrap()
            .contains("renderer bug"));
        assert_eq!(hook.snapshot().failed, 0);
    }

    #[test]
    fn test_uncommitted_response_reaches_every_sink() {
        let mut builder = DispatchHubBuilder::new();
        let a = builder.add("a", ListSink::new("a")).unwrap();
        let b = builder.add("b", ListSink::new("b")).unwrap();
        let hook = AccessHook::new(CaptureOptions::default(), Arc::new(builder.build()));

        hook.on_request_complete(
            &mut MockRequest::get("/download"),
            &MockResponse::uncommitted(),
            timing(),
        );

        for list in [&a, &b] {
            let event = &list.events()[0];
            assert_eq!(event.status_code(), 0);
            assert_eq!(event.content_length(), -1);
            assert!(!event.is_committed());
        }
    }

    #[test]
    fn test_drop_newest_through_hub() {
        let (queued, mut gate) = gated_queue("slow", 2, AdmissionPolicy::DropNewest);
        let mut builder = DispatchHubBuilder::new();
        let queued = builder.add_queued("slow", queued).unwrap();
        let hub = Arc::new(builder.build());
        let hook = AccessHook::new(CaptureOptions::default(), Arc::clone(&hub));

        hook.on_request_complete(&mut MockRequest::get("/e0"), &MockResponse::ok(0), timing());
        gate.wait_entered();
        for i in 1..=3 {
            let outcome = hook.on_request_complete(
                &mut MockRequest::get(&format!("/e{i}")),
                &MockResponse::ok(0),
                timing(),
            );
            // A dropped event is not a delivery failure
            assert_eq!(
                outcome,
                HookOutcome::Dispatched(DispatchReport { delivered: 1, failed: 0 })
            );
        }
        assert_eq!(queued.metrics().dropped(), 1);
        assert_eq!(queued.pending(), 2);

        gate.open();
        hub.shutdown();
        assert_eq!(uris(&gate.list), ["/e0", "/e1", "/e2"]);
    }

    #[test]
    fn test_drop_oldest_through_hub() {
        let (queued, mut gate) = gated_queue("slow", 2, AdmissionPolicy::DropOldest);
        let mut builder = DispatchHubBuilder::new();
        let queued = builder.add_queued("slow", queued).unwrap();
        let hub = Arc::new(builder.build());
        let hook = AccessHook::new(CaptureOptions::default(), Arc::clone(&hub));

        hook.on_request_complete(&mut MockRequest::get("/e0"), &MockResponse::ok(0), timing());
        gate.wait_entered();
        for i in 1..=3 {
            hook.on_request_complete(
                &mut MockRequest::get(&format!("/e{i}")),
                &MockResponse::ok(0),
                timing(),
            );
        }
        assert_eq!(queued.metrics().dropped(), 1);

        gate.open();
        hub.shutdown();
        assert_eq!(uris(&gate.list), ["/e0", "/e2", "/e3"]);
    }

    #[test]
    fn test_block_timeout_counts_as_sink_failure() {
        let (queued, mut gate) = gated_queue("slow", 1, AdmissionPolicy::Block);
        let mut builder = DispatchHubBuilder::new();
        builder.add_queued("slow", queued).unwrap();
        let hub = Arc::new(builder.build());
        let hook = AccessHook::new(CaptureOptions::default(), Arc::clone(&hub));

        hook.on_request_complete(&mut MockRequest::get("/e0"), &MockResponse::ok(0), timing());
        gate.wait_entered();
        hook.on_request_complete(&mut MockRequest::get("/e1"), &MockResponse::ok(0), timing());
        let outcome =
            hook.on_request_complete(&mut MockRequest::get("/e2"), &MockResponse::ok(0), timing());

        assert_eq!(
            outcome,
            HookOutcome::Dispatched(DispatchReport { delivered: 0, failed: 1 })
        );
        let report = hub.metrics("slow").unwrap().snapshot();
        assert_eq!(report.failure_count, 1);
        assert!(report.last_error.unwrap().contains("full after waiting"));

        gate.open();
        hub.shutdown();
        assert_eq!(uris(&gate.list), ["/e0", "/e1"]);
    }

    #[test]
    fn test_concurrent_requests_drain_on_shutdown() {
        let list = Arc::new(ListSink::new("list"));
        let queued = QueuedSink::spawn(
            "async-list",
            Arc::clone(&list),
            QueueConfig {
                capacity: 16,
                admission: AdmissionPolicy::Block,
                block_timeout_ms: 5_000,
                shutdown_deadline_ms: 5_000,
            },
        )
        .unwrap();
        let mut builder = DispatchHubBuilder::new();
        builder.add_queued("async-list", queued).unwrap();
        let hub = Arc::new(builder.build());
        let hook = Arc::new(AccessHook::new(CaptureOptions::default(), Arc::clone(&hub)));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let hook = Arc::clone(&hook);
                thread::spawn(move || {
                    for i in 0..50 {
                        hook.on_request_complete(
                            &mut MockRequest::get(&format!("/t{t}/{i}")),
                            &MockResponse::ok(i),
                            timing(),
                        );
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let report = hub.shutdown();
        assert_eq!(report.failed, 0);
        assert_eq!(list.len(), 200);

        // Per request thread, delivery order is preserved
        let uris = uris(&list);
        for t in 0..4 {
            let prefix = format!("/t{t}/");
            let seen: Vec<u64> = uris
                .iter()
                .filter_map(|u| u.strip_prefix(&prefix))
                .map(|i| i.parse().unwrap())
                .collect();
            assert_eq!(seen, (0..50).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_hook_never_panics() {
        let mut builder = DispatchHubBuilder::new();
        builder.add("panicking", PanickingSink).unwrap();
        let hook = AccessHook::new(CaptureOptions::default(), Arc::new(builder.build()));

        let outcome = hook.on_request_complete(
            &mut MockRequest::get("/boom"),
            &MockResponse::ok(0),
            timing(),
        );

        assert_eq!(
            outcome,
            HookOutcome::Dispatched(DispatchReport { delivered: 0, failed: 1 })
        );
        assert_eq!(hook.status().count(StatusLevel::Error), 1);
    }

    #[test]
    fn test_consumed_body_yields_empty_parameters() {
        let options = CaptureOptions {
            capture_body_parameters: true,
            ..CaptureOptions::default()
        };
        let (hook, list) = hook_with_list(options);
        let mut request = MockRequest::post("/login", "application/x-www-form-urlencoded", "a=1")
            .query("next=/home");
        request.consume_body();

        hook.on_request_complete(&mut request, &MockResponse::ok(0), timing());

        let event = &list.events()[0];
        assert!(event.request_parameter("a").is_empty());
        assert_eq!(event.request_parameter("next"), ["/home"]);
        assert!(hook.status().count(StatusLevel::Warn) >= 1);
    }

    #[test]
    fn test_http_parts_into_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("access.log");
        let config = AccessLogConfig {
            sinks: vec![SinkConfig {
                name: "file".to_string(),
                sink_type: SinkType::File,
                format: RenderFormat::Common,
                queue: Some(QueueConfig::default()),
                params: HashMap::from([(
                    "path".to_string(),
                    path.to_string_lossy().into_owned(),
                )]),
            }],
            ..AccessLogConfig::default()
        };
        let status = StatusChannel::shared();
        let hub = Arc::new(dispatcher::create_hub(&config, Arc::clone(&status)).unwrap());
        let hook = AccessHook::new(config.capture.clone(), Arc::clone(&hub));

        let (req, ()) = http::Request::get("/index.html?lang=en")
            .header("User-Agent", "curl/8.5.0")
            .body(())
            .unwrap()
            .into_parts();
        let (resp, ()) = http::Response::builder()
            .status(404)
            .header("Content-Length", "9")
            .body(())
            .unwrap()
            .into_parts();
        let mut request = HttpRequest::new(&req).with_remote_addr("198.51.100.4:41000".parse().unwrap());
        hook.on_request_complete(&mut request, &HttpResponse::new(&resp), timing());

        let report = hub.shutdown();
        assert_eq!(report.failed, 0);
        assert_eq!(status.count(StatusLevel::Error), 0);

        let written = std::fs::read_to_string(&path).unwrap();
        let line = written.lines().next().unwrap();
        assert!(line.starts_with("198.51.100.4 - - ["));
        assert!(line.ends_with("\"GET /index.html?lang=en HTTP/1.1\" 404 9"));
    }

    #[test]
    fn test_udp_sink_end_to_end() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let addr = receiver.local_addr().unwrap();

        let config = AccessLogConfig {
            sinks: vec![SinkConfig {
                name: "udp".to_string(),
                sink_type: SinkType::Network,
                format: RenderFormat::Json,
                queue: Some(QueueConfig::with_capacity(8, AdmissionPolicy::DropNewest)),
                params: HashMap::from([("addr".to_string(), addr.to_string())]),
            }],
            ..AccessLogConfig::default()
        };
        let hub = Arc::new(dispatcher::create_hub(&config, StatusChannel::shared()).unwrap());
        let hook = AccessHook::new(config.capture.clone(), Arc::clone(&hub));

        hook.on_request_complete(
            &mut MockRequest::get("/udp").query("x=1"),
            &MockResponse::ok(3),
            timing(),
        );

        let mut buf = [0u8; 65_536];
        let len = receiver.recv(&mut buf).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&buf[..len]).unwrap();
        assert!(json.to_string().contains("/udp"));

        hub.shutdown();
    }
}
