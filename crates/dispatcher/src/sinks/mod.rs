//! Sink implementations
//!
//! Contains LogSink, FileSink, NetworkSink, and ListSink.

mod file;
mod list;
mod log;
mod network;

pub use self::file::{FileSink, FileSinkConfig};
pub use self::list::ListSink;
pub use self::log::LogSink;
pub use self::network::{NetworkFormat, NetworkSink, NetworkSinkConfig};
