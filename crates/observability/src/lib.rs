//! # Observability
//!
//! 可观测性模块：Tracing + Prometheus 指标 + 状态通道。
//!
//! ## 功能
//!
//! - Tracing 初始化 (JSON/Pretty/Compact 格式)
//! - Prometheus 指标导出
//! - 访问事件指标收集与统计
//! - `StatusChannel`：hook / hub / sink 的内部故障上报
//!
//! ## 使用示例
//!
//! ```ignore
//! use observability::{init, metrics};
//!
//! observability::init()?;
//!
//! let event = freezer.freeze(live);
//! metrics::record_event_captured(&event);
//! ```

pub mod metrics;
pub mod status;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

// Re-exports
pub use crate::metrics::{
    describe_metrics, record_delivery, record_event_captured, record_event_filtered,
    record_freeze_latency_us, record_hook_failure, record_queue_depth, record_queue_drop,
    status_class, AccessMetricsAggregator, MetricsSummary, RunningStats, StatsSummary,
};
pub use crate::status::{StatusChannel, StatusLevel, StatusRecord};

/// `LogSink` 输出访问日志使用的 tracing target
pub const ACCESS_LOG_TARGET: &str = "access_tap::access";

/// 初始化可观测性（Tracing + Prometheus）
///
/// - Tracing: JSON 格式，支持 RUST_LOG 环境变量
/// - Prometheus: 默认禁用
pub fn init() -> Result<()> {
    init_with_config(ObservabilityConfig::default())
}

/// 可观测性配置
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// 日志格式
    pub log_format: LogFormat,
    /// Prometheus 端口 (None = 禁用)
    pub metrics_port: Option<u16>,
    /// 默认日志级别（未设置 RUST_LOG 时生效）
    pub default_log_level: String,
    /// 是否输出 `access_tap::access` 访问日志行
    pub access_log: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Json,
            metrics_port: None,
            default_log_level: "info".to_string(),
            access_log: true,
        }
    }
}

impl ObservabilityConfig {
    /// RUST_LOG 优先，其次 `default_log_level`；关闭访问日志时追加 `=off` 指令
    pub fn filter(&self) -> Result<EnvFilter> {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.default_log_level))
            .with_context(|| format!("Invalid log level '{}'", self.default_log_level))?;

        if self.access_log {
            return Ok(filter);
        }
        let directive = format!("{ACCESS_LOG_TARGET}=off")
            .parse()
            .context("Invalid access log directive")?;
        Ok(filter.add_directive(directive))
    }
}

/// 日志格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON 结构化日志
    #[default]
    Json,
    /// 人类可读格式
    Pretty,
    /// 紧凑单行格式
    Compact,
}

/// 使用自定义配置初始化
pub fn init_with_config(config: ObservabilityConfig) -> Result<()> {
    // 1. Initialize Tracing
    tracing_subscriber::registry()
        .with(fmt_layer(config.log_format).with_filter(config.filter()?))
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    // 2. Initialize Prometheus Exporter (if enabled)
    if let Some(port) = config.metrics_port {
        install_prometheus(port)?;
    }

    tracing::info!(
        log_format = ?config.log_format,
        metrics_port = ?config.metrics_port,
        access_log = config.access_log,
        "Observability initialized"
    );

    Ok(())
}

/// 仅初始化 Prometheus 指标（不初始化 Tracing）
///
/// 用于宿主服务已自行初始化 Tracing 的场景。
pub fn init_metrics_only(port: u16) -> Result<()> {
    install_prometheus(port)
}

/// Worker threads are named per sink, so every format keeps thread names
fn fmt_layer(format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_names(true)
            .with_current_span(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer().pretty().with_thread_names(true).boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_thread_names(true)
            .boxed(),
    }
}

fn install_prometheus(port: u16) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .with_context(|| format!("Failed to install Prometheus recorder on port {port}"))?;
    describe_metrics();

    tracing::info!(port, "Prometheus metrics endpoint initialized");
    Ok(())
}
