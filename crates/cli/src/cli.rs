//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// access-tap - HTTP access-event capture and fan-out
#[derive(Parser, Debug)]
#[command(
    name = "access-tap",
    author,
    version,
    about = "HTTP access-event capture and fan-out",
    long_about = "Captures finished HTTP exchanges as immutable access events and fans them\n\
                  out to log, file and UDP sinks, optionally behind bounded queues.\n\n\
                  The `simulate` command drives synthetic traffic through the full\n\
                  hook -> hub -> sink path and prints delivery statistics."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "ACCESS_TAP_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "ACCESS_TAP_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    /// Expose Prometheus metrics on this port
    #[arg(long, global = true, env = "ACCESS_TAP_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Drive synthetic requests through the capture pipeline
    Simulate(SimulateArgs),

    /// Display the effective configuration
    Info(InfoArgs),
}

/// Arguments for the `simulate` command
#[derive(Parser, Debug, Clone)]
pub struct SimulateArgs {
    /// Number of requests to complete
    #[arg(short = 'n', long, default_value = "100", env = "ACCESS_TAP_REQUESTS")]
    pub requests: u64,

    /// Request threads completing exchanges concurrently
    #[arg(long, default_value = "1", env = "ACCESS_TAP_WORKERS")]
    pub workers: usize,

    /// Requests per second across all workers (0 = as fast as possible)
    #[arg(long, default_value = "0", env = "ACCESS_TAP_RATE")]
    pub rate: u64,

    #[command(flatten)]
    pub output: OutputArgs,
}

/// Arguments for the `info` command
#[derive(Parser, Debug, Clone)]
pub struct InfoArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub output: OutputArgs,
}

/// Capture switches and sink routing shared by every command
#[derive(Args, Debug, Clone, Default)]
pub struct OutputArgs {
    /// Render events through the tracing log
    #[arg(long, env = "ACCESS_TAP_LOG_SINK")]
    pub log_sink: bool,

    /// Append rendered events to this file
    #[arg(long, env = "ACCESS_TAP_FILE")]
    pub file: Option<PathBuf>,

    /// Send events as UDP datagrams to this address
    #[arg(long, env = "ACCESS_TAP_UDP")]
    pub udp: Option<String>,

    /// Datagram encoding for the UDP sink
    #[arg(long, value_enum, default_value = "json", env = "ACCESS_TAP_UDP_ENCODING")]
    pub udp_encoding: UdpEncoding,

    /// Line layout for the log and file sinks
    #[arg(long, value_enum, default_value = "combined", env = "ACCESS_TAP_FORMAT")]
    pub format: EventFormat,

    /// Put file and UDP sinks behind a bounded queue of this capacity
    #[arg(long, env = "ACCESS_TAP_QUEUE_CAPACITY")]
    pub queue_capacity: Option<usize>,

    /// What a full queue does with a new event
    #[arg(long, value_enum, default_value = "block", env = "ACCESS_TAP_ADMISSION")]
    pub admission: Admission,

    /// Longest a request thread waits on a full queue under `block`
    #[arg(long, default_value = "20", env = "ACCESS_TAP_BLOCK_TIMEOUT_MS")]
    pub block_timeout_ms: u64,

    /// Longest queued sinks keep draining at shutdown
    #[arg(long, default_value = "1000", env = "ACCESS_TAP_SHUTDOWN_DEADLINE_MS")]
    pub shutdown_deadline_ms: u64,

    /// Skip requests whose path starts with this prefix (repeatable)
    #[arg(long = "exclude", value_name = "PREFIX")]
    pub exclude: Vec<String>,

    /// Decode form-encoded request bodies into parameters
    #[arg(long)]
    pub capture_body: bool,

    /// Keep the request body text on the event
    #[arg(long)]
    pub capture_content: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EventFormat {
    /// NCSA common log format
    Common,
    /// Common plus referer and user agent
    #[default]
    Combined,
    /// One JSON object per line
    Json,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UdpEncoding {
    #[default]
    Json,
    Bincode,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Admission {
    /// Wait up to the block timeout, then fail the delivery
    #[default]
    Block,
    /// Discard the incoming event
    DropNewest,
    /// Evict the oldest queued event
    DropOldest,
}
