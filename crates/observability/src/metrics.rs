//! 访问事件指标收集模块
//!
//! 记录捕获、分发、队列三个环节的运行指标（Prometheus），
//! 以及内存中的摘要统计。

use std::collections::BTreeMap;

use contracts::AccessEvent;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

/// 向已安装的 recorder 注册指标说明与单位
pub fn describe_metrics() {
    describe_counter!(
        "access_tap_events_captured_total",
        "Access events frozen by the completion hook"
    );
    describe_counter!(
        "access_tap_events_filtered_total",
        "Requests skipped by the disabled switch or a path filter"
    );
    describe_counter!(
        "access_tap_hook_failures_total",
        "Completion hook invocations that panicked"
    );
    describe_counter!(
        "access_tap_deliveries_total",
        "Per-sink delivery attempts by outcome"
    );
    describe_counter!(
        "access_tap_queue_dropped_total",
        "Events refused or evicted by a full sink queue"
    );
    describe_gauge!("access_tap_queue_depth", "Events waiting in a sink queue");
    describe_histogram!(
        "access_tap_request_elapsed_ms",
        Unit::Milliseconds,
        "Request-received to response-committed time"
    );
    describe_histogram!(
        "access_tap_response_bytes",
        Unit::Bytes,
        "Response body length when known"
    );
    describe_histogram!(
        "access_tap_freeze_latency_us",
        Unit::Microseconds,
        "Time spent freezing one exchange"
    );
}

/// 记录一次成功捕获的访问事件
///
/// 每次 completion hook 冻结出 `AccessEvent` 后调用。
pub fn record_event_captured(event: &AccessEvent) {
    counter!(
        "access_tap_events_captured_total",
        "status_class" => status_class(event.status_code())
    )
    .increment(1);

    histogram!("access_tap_request_elapsed_ms").record(event.elapsed_millis() as f64);

    if event.content_length() >= 0 {
        histogram!("access_tap_response_bytes").record(event.content_length() as f64);
    }
}

/// 记录被排除（禁用或路径过滤）的请求
pub fn record_event_filtered(reason: &'static str) {
    counter!("access_tap_events_filtered_total", "reason" => reason).increment(1);
}

/// 记录 hook 内部失败（冻结出错或 panic）
pub fn record_hook_failure(kind: &'static str) {
    counter!("access_tap_hook_failures_total", "kind" => kind).increment(1);
}

/// 记录冻结耗时
pub fn record_freeze_latency_us(latency_us: f64) {
    histogram!("access_tap_freeze_latency_us").record(latency_us);
}

/// 记录单个 sink 的投递结果
pub fn record_delivery(sink_name: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "access_tap_deliveries_total",
        "sink" => sink_name.to_string(),
        "status" => status
    )
    .increment(1);
}

/// 记录队列丢弃的事件
pub fn record_queue_drop(sink_name: &str, policy: &'static str) {
    counter!(
        "access_tap_queue_dropped_total",
        "sink" => sink_name.to_string(),
        "policy" => policy
    )
    .increment(1);
}

/// 记录队列深度
pub fn record_queue_depth(sink_name: &str, depth: usize) {
    gauge!(
        "access_tap_queue_depth",
        "sink" => sink_name.to_string()
    )
    .set(depth as f64);
}

/// 状态码分类标签（`2xx`、`5xx`，未提交为 `none`）
pub fn status_class(status_code: u16) -> &'static str {
    match status_code {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        0 => "none",
        _ => "other",
    }
}

/// 访问指标聚合器
///
/// 在内存中聚合指标，便于统计和输出摘要。
#[derive(Debug, Clone, Default)]
pub struct AccessMetricsAggregator {
    /// 总事件数
    pub total_events: u64,

    /// 响应未提交的事件数
    pub uncommitted: u64,

    /// 服务端错误 (5xx) 数
    pub server_errors: u64,

    /// 请求耗时统计 (ms)
    pub elapsed_stats: RunningStats,

    /// 响应体大小统计（仅已知长度）
    pub bytes_stats: RunningStats,

    /// 各状态码分类计数
    pub status_counts: BTreeMap<&'static str, u64>,

    /// 各方法计数
    pub method_counts: BTreeMap<String, u64>,
}

impl AccessMetricsAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    /// 更新聚合统计
    pub fn update(&mut self, event: &AccessEvent) {
        self.total_events += 1;

        if !event.is_committed() {
            self.uncommitted += 1;
        }
        if (500..600).contains(&event.status_code()) {
            self.server_errors += 1;
        }

        *self
            .status_counts
            .entry(status_class(event.status_code()))
            .or_insert(0) += 1;
        *self
            .method_counts
            .entry(event.method().to_string())
            .or_insert(0) += 1;

        self.elapsed_stats.push(event.elapsed_millis() as f64);
        if event.content_length() >= 0 {
            self.bytes_stats.push(event.content_length() as f64);
        }
    }

    /// 生成摘要报告
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_events: self.total_events,
            uncommitted: self.uncommitted,
            server_errors: self.server_errors,
            error_rate: if self.total_events > 0 {
                self.server_errors as f64 / self.total_events as f64 * 100.0
            } else {
                0.0
            },
            elapsed_ms: StatsSummary::from(&self.elapsed_stats),
            response_bytes: StatsSummary::from(&self.bytes_stats),
            status_counts: self.status_counts.clone(),
            method_counts: self.method_counts.clone(),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_events: u64,
    pub uncommitted: u64,
    pub server_errors: u64,
    pub error_rate: f64,
    pub elapsed_ms: StatsSummary,
    pub response_bytes: StatsSummary,
    pub status_counts: BTreeMap<&'static str, u64>,
    pub method_counts: BTreeMap<String, u64>,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Access Metrics Summary ===")?;
        writeln!(f, "Total events: {}", self.total_events)?;
        writeln!(f, "Uncommitted responses: {}", self.uncommitted)?;
        writeln!(
            f,
            "Server errors: {} ({:.2}%)",
            self.server_errors, self.error_rate
        )?;
        writeln!(f, "Elapsed (ms): {}", self.elapsed_ms)?;
        writeln!(f, "Response bytes: {}", self.response_bytes)?;

        if !self.status_counts.is_empty() {
            writeln!(f, "Status classes:")?;
            for (class, count) in &self.status_counts {
                writeln!(f, "  {}: {}", class, count)?;
            }
        }

        if !self.method_counts.is_empty() {
            writeln!(f, "Methods:")?;
            for (method, count) in &self.method_counts {
                writeln!(f, "  {}: {}", method, count)?;
            }
        }

        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.1}, max={:.1}, mean={:.1}, std={:.1} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
