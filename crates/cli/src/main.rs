//! # access-tap CLI
//!
//! 命令行接口入口点。
//!
//! 提供：
//! - 由命令行参数构建有效配置
//! - 通过完整 hook -> hub -> sink 链路驱动模拟流量
//! - 优雅关闭处理

mod cli;
mod commands;
mod config;
mod error;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use cli::{Cli, Commands};
use commands::{run_info, run_simulate};
use observability::ObservabilityConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    init_observability(&cli)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "access-tap CLI starting"
    );

    let result = match &cli.command {
        Commands::Simulate(args) => run_simulate(args).await,
        Commands::Info(args) => run_info(args),
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }

    result
}

/// Initialize logging and metrics based on CLI options
fn init_observability(cli: &Cli) -> Result<()> {
    let default_log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let log_format = match cli.log_format {
        cli::LogFormat::Json => observability::LogFormat::Json,
        cli::LogFormat::Pretty => observability::LogFormat::Pretty,
        cli::LogFormat::Compact => observability::LogFormat::Compact,
    };

    observability::init_with_config(ObservabilityConfig {
        log_format,
        metrics_port: cli.metrics_port,
        default_log_level: default_log_level.to_string(),
        ..ObservabilityConfig::default()
    })
}
