//! `simulate` command implementation.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use capture::{AccessHook, HookOutcome};
use contracts::mock::{MockRequest, MockResponse};
use contracts::ExchangeTiming;
use dispatcher::{DispatchHub, ListSink};
use observability::{AccessMetricsAggregator, StatusChannel, StatusLevel};

use crate::cli::SimulateArgs;
use crate::error::CliError;

/// Internal sink feeding the end-of-run summary
const SUMMARY_SINK: &str = "summary";

const PATHS: [&str; 7] = [
    "/",
    "/index.html",
    "/api/items",
    "/api/items/42",
    "/login",
    "/healthz",
    "/static/app.js",
];

const AGENTS: [&str; 3] = [
    "Mozilla/5.0 (X11; Linux x86_64)",
    "curl/8.5.0",
    "Go-http-client/1.1",
];

/// Counters from one traffic run
#[derive(Debug, Default)]
pub struct SimulationStats {
    pub sent: u64,
    pub dispatched: u64,
    pub filtered: u64,
    pub failed: u64,
    pub duration: Duration,
}

impl SimulationStats {
    pub fn throughput(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.sent as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    dispatched: AtomicU64,
    filtered: AtomicU64,
    failed: AtomicU64,
}

/// Shape of the synthetic traffic
#[derive(Debug, Clone, Copy)]
struct TrafficPlan {
    requests: u64,
    workers: usize,
    /// Pause between two requests of the same worker
    pace: Option<Duration>,
}

impl TrafficPlan {
    fn from_args(args: &SimulateArgs) -> Result<Self, CliError> {
        if args.requests == 0 {
            return Err(CliError::invalid_argument("requests", "must be > 0"));
        }
        if args.workers == 0 {
            return Err(CliError::invalid_argument("workers", "must be > 0"));
        }
        let pace = (args.rate > 0)
            .then(|| Duration::from_secs_f64(args.workers as f64 / args.rate as f64));
        Ok(Self {
            requests: args.requests,
            workers: args.workers,
            pace,
        })
    }
}

/// Execute the `simulate` command
pub async fn run_simulate(args: &SimulateArgs) -> Result<()> {
    let plan = TrafficPlan::from_args(args)?;
    let config = args.output.to_config()?;

    info!(
        requests = plan.requests,
        workers = plan.workers,
        sinks = config.sinks.len(),
        "Starting simulation"
    );

    let status = StatusChannel::shared();
    let mut builder = dispatcher::create_hub(&config, Arc::clone(&status))
        .map_err(CliError::from)?
        .into_builder();
    let summary = builder
        .add(SUMMARY_SINK, ListSink::new(SUMMARY_SINK))
        .map_err(CliError::from)?;
    let hub = Arc::new(builder.build());
    let hook = Arc::new(AccessHook::new(config.capture.clone(), Arc::clone(&hub)));

    let stop = Arc::new(AtomicBool::new(false));
    let mut worker = {
        let hook = Arc::clone(&hook);
        let stop = Arc::clone(&stop);
        tokio::task::spawn_blocking(move || drive(&hook, plan, &stop))
    };

    let joined = tokio::select! {
        joined = &mut worker => joined,
        _ = shutdown_signal() => {
            warn!("Received shutdown signal, stopping traffic...");
            stop.store(true, Ordering::Release);
            worker.await
        }
    };
    let stats =
        joined.map_err(|e| CliError::simulation(format!("traffic driver panicked: {e}")))?;

    let shutdown = hub.shutdown();
    info!(
        sent = stats.sent,
        dispatched = stats.dispatched,
        closed = shutdown.closed,
        close_failures = shutdown.failed,
        "Simulation finished"
    );

    print_report(&stats, &hub, &summary, &status);
    Ok(())
}

/// Complete `plan.requests` exchanges through the hook across the worker threads
fn drive(hook: &AccessHook, plan: TrafficPlan, stop: &AtomicBool) -> SimulationStats {
    let counters = Counters::default();
    let started = Instant::now();

    thread::scope(|scope| {
        for worker in 0..plan.workers {
            let counters = &counters;
            let spawned = thread::Builder::new()
                .name(format!("sim-worker-{worker}"))
                .spawn_scoped(scope, move || {
                    let mut seq = worker as u64;
                    while seq < plan.requests && !stop.load(Ordering::Acquire) {
                        complete_exchange(hook, seq, counters);
                        seq += plan.workers as u64;
                        if let Some(pace) = plan.pace {
                            thread::sleep(pace);
                        }
                    }
                });
            if let Err(e) = spawned {
                warn!(worker, error = %e, "Failed to spawn worker thread");
            }
        }
    });

    SimulationStats {
        sent: counters.sent.load(Ordering::Relaxed),
        dispatched: counters.dispatched.load(Ordering::Relaxed),
        filtered: counters.filtered.load(Ordering::Relaxed),
        failed: counters.failed.load(Ordering::Relaxed),
        duration: started.elapsed(),
    }
}

fn complete_exchange(hook: &AccessHook, seq: u64, counters: &Counters) {
    let timing = ExchangeTiming::start();
    let (mut request, mut response) = synthetic_exchange(seq);
    let outcome = hook.on_request_complete(&mut request, &response, timing.finish());

    // The server reuses its objects right after the hook returns
    request.recycle();
    response.recycle();

    counters.sent.fetch_add(1, Ordering::Relaxed);
    let counter = match outcome {
        HookOutcome::Dispatched(_) => &counters.dispatched,
        HookOutcome::Filtered | HookOutcome::Disabled => &counters.filtered,
        HookOutcome::Failed => &counters.failed,
    };
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Deterministic request/response pair for sequence number `seq`
fn synthetic_exchange(seq: u64) -> (MockRequest, MockResponse) {
    let path = PATHS[(seq % PATHS.len() as u64) as usize];
    let agent = AGENTS[(seq % AGENTS.len() as u64) as usize];
    let remote = format!("192.0.2.{}", seq % 250 + 1);

    let request = if path == "/login" {
        MockRequest::post(
            path,
            "application/x-www-form-urlencoded",
            &format!("user=user{seq}&remember=1"),
        )
    } else if path.starts_with("/api") {
        MockRequest::get(path).query(&format!("page={}", seq % 5))
    } else {
        MockRequest::get(path)
    };
    let request = request
        .from_addr(&remote)
        .server_name("localhost")
        .local_port(8080)
        .session(&format!("s{:04}", seq % 64))
        .header("User-Agent", agent)
        .header("Referer", "http://localhost:8080/");

    let length = (seq * 37) % 4096;
    let response = if seq % 50 == 49 {
        MockResponse::uncommitted()
    } else if path == "/login" {
        MockResponse::new(302, 0).header("Location", "/")
    } else if seq % 17 == 0 {
        MockResponse::new(500, length)
    } else if seq % 7 == 0 {
        MockResponse::new(404, length)
    } else {
        MockResponse::ok(length).header("Content-Type", "text/html")
    };

    (request, response)
}

fn print_report(
    stats: &SimulationStats,
    hub: &DispatchHub,
    summary: &ListSink,
    status: &StatusChannel,
) {
    let mut aggregator = AccessMetricsAggregator::new();
    for event in summary.events() {
        aggregator.update(&event);
    }

    println!("\n=== Simulation ===");
    println!("Duration: {:.3}s", stats.duration.as_secs_f64());
    println!("Requests sent: {}", stats.sent);
    println!("Dispatched: {}", stats.dispatched);
    println!("Filtered: {}", stats.filtered);
    println!("Hook failures: {}", stats.failed);
    println!("Throughput: {:.1} req/s\n", stats.throughput());

    print!("{}", aggregator.summary());

    println!("\n=== Sinks ===");
    for report in hub.metrics_snapshot() {
        if report.id.as_str() == SUMMARY_SINK {
            continue;
        }
        print!(
            "{}: delivered={} failed={}",
            report.id, report.sink.delivered_count, report.sink.failure_count
        );
        if let Some(queue) = report.queue {
            print!(
                " | queue enqueued={} delivered={} dropped={} retried={} abandoned={}",
                queue.enqueued, queue.delivered, queue.dropped, queue.retried, queue.abandoned
            );
        }
        println!();
        if let Some(error) = report.sink.last_error {
            println!("  last error: {error}");
        }
    }

    let warnings = status.count(StatusLevel::Warn);
    let errors = status.count(StatusLevel::Error);
    if warnings + errors > 0 {
        println!("\n=== Status ({warnings} warnings, {errors} errors) ===");
        for record in status
            .records()
            .iter()
            .filter(|r| r.level >= StatusLevel::Warn)
        {
            println!("{record}");
        }
    }
}

/// Ctrl+C and SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
