//! `info` command implementation.

use anyhow::{Context, Result};
use tracing::info;

use contracts::{AccessLogConfig, SinkConfig};

use crate::cli::InfoArgs;

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    let config = args.output.to_config()?;
    info!(sinks = config.sinks.len(), "Effective configuration built");

    if args.json {
        let json =
            serde_json::to_string_pretty(&config).context("Failed to serialize configuration")?;
        println!("{}", json);
    } else {
        print_config_info(&config);
    }

    Ok(())
}

fn print_config_info(config: &AccessLogConfig) {
    let capture = &config.capture;
    println!("=== access-tap configuration ({:?}) ===\n", config.version);

    println!("Capture");
    println!("  body parameters: {}", capture.capture_body_parameters);
    println!("  request content: {}", capture.capture_request_content);
    println!("  max content bytes: {}", capture.max_content_bytes);
    if capture.exclude_path_prefixes.is_empty() {
        println!("  excluded prefixes: (none)");
    } else {
        println!(
            "  excluded prefixes: {}",
            capture.exclude_path_prefixes.join(", ")
        );
    }

    println!("\nSinks ({})", config.sinks.len());
    if config.sinks.is_empty() {
        println!("  (none; events are only counted)");
    }
    for sink in &config.sinks {
        println!("  {}", describe_sink(sink));
    }
    println!();
}

fn describe_sink(sink: &SinkConfig) -> String {
    let mut params: Vec<_> = sink
        .params
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    params.sort();

    let mut line = format!(
        "{} ({:?}, {:?}) {}",
        sink.name,
        sink.sink_type,
        sink.format,
        params.join(" ")
    );
    match &sink.queue {
        Some(queue) => line.push_str(&format!(
            " | queue capacity={} admission={:?} block_timeout={}ms shutdown_deadline={}ms",
            queue.capacity, queue.admission, queue.block_timeout_ms, queue.shutdown_deadline_ms
        )),
        None => line.push_str(" | inline"),
    }
    line
}
