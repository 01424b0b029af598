//! # Dispatcher
//!
//! 访问事件分发模块。
//!
//! 负责：
//! - `DispatchHub`：按注册顺序 fan-out 到多个 sinks，单个 sink 的失败/panic 不影响其他 sink
//! - `QueuedSink`：有界队列 + 独立工作线程，隔离慢 sink，不阻塞请求线程
//! - 渲染器与参考 sinks（log / file / network / list）

pub mod error;
pub mod hub;
pub mod metrics;
pub mod queue;
pub mod render;
pub mod sinks;

pub use contracts::{AccessSink, SharedEvent};
pub use error::{panic_message, DispatcherError};
pub use hub::{
    create_hub, create_sink, DispatchHub, DispatchHubBuilder, DispatchReport, ShutdownReport,
    SinkReport,
};
pub use metrics::{MetricsSnapshot, QueueMetrics, QueueSnapshot, SinkMetrics};
pub use queue::QueuedSink;
pub use render::{renderer_for, CombinedRenderer, CommonRenderer, EventRenderer, JsonRenderer};
pub use sinks::{FileSink, ListSink, LogSink, NetworkSink};
