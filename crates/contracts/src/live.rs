//! Live request/response handles - the server side of the completion hook
//!
//! Handles are only valid for the duration of the hook call. Anything read
//! from them must be copied before the hook returns; the server may recycle
//! the underlying objects immediately afterwards.

use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::ContractError;

/// Live view of a request the server is about to recycle.
///
/// Accessors mirror the request line and connection metadata. Methods
/// returning `Option` yield `None` when the server cannot provide the value
/// (e.g. the client already disconnected); the freezer substitutes a sentinel.
pub trait LiveRequest {
    /// Request method, verbatim (`"GET"`)
    fn method(&self) -> &str;

    /// Request target as received. May still carry `?query` if the server
    /// did not split it; the freezer strips it.
    fn request_uri(&self) -> &str;

    /// Raw query component without the leading `?`
    fn query(&self) -> Option<&str>;

    /// Protocol token (`"HTTP/1.1"`)
    fn protocol(&self) -> &str;

    /// Peer address
    fn remote_addr(&self) -> Option<String>;

    /// Reverse-resolved peer host, when the server already resolved it.
    ///
    /// Must not perform a lookup: freezing does no I/O.
    fn remote_host(&self) -> Option<String> {
        None
    }

    /// Virtual host the request was addressed to
    fn server_name(&self) -> Option<&str>;

    fn local_port(&self) -> Option<u16> {
        None
    }

    /// Id of an already existing session. Must never create one.
    fn session_id(&self) -> Option<&str> {
        None
    }

    /// Visit every header in arrival order; repeated headers are visited once per value
    fn visit_headers(&self, visitor: &mut dyn FnMut(&str, &str));

    /// Value of the `Content-Type` header
    fn content_type(&self) -> Option<String> {
        let mut found = None;
        self.visit_headers(&mut |name, value| {
            if found.is_none() && name.eq_ignore_ascii_case("content-type") {
                found = Some(value.to_string());
            }
        });
        found
    }

    /// Take the request body.
    ///
    /// Returns `Ok(None)` when the body is absent or was already consumed by
    /// the application handler.
    fn take_body(&mut self) -> Result<Option<Bytes>, ContractError>;
}

/// Live view of the response of the same exchange.
pub trait LiveResponse {
    /// Committed status code; `None` if the response was never committed
    fn status(&self) -> Option<u16>;

    /// Bytes written to the response body, if known
    fn content_length(&self) -> Option<u64>;

    /// Visit every response header in order
    fn visit_headers(&self, visitor: &mut dyn FnMut(&str, &str));
}

/// Clock readings for one exchange.
///
/// Wall clock for the reported timestamp, monotonic clock for the duration.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeTiming {
    /// Wall-clock instant the request was received
    pub started_wall: DateTime<Utc>,
    /// Monotonic instant the request was received
    pub started: Instant,
    /// Monotonic instant the response was committed
    pub finished: Instant,
}

impl ExchangeTiming {
    /// Timing for a request received now; call [`finish`](Self::finish) at commit
    pub fn start() -> Self {
        let now = Instant::now();
        Self {
            started_wall: Utc::now(),
            started: now,
            finished: now,
        }
    }

    /// Mark the response as committed now
    pub fn finish(mut self) -> Self {
        self.finished = Instant::now();
        self
    }

    /// Elapsed time; zero if the clocks are out of order
    pub fn elapsed(&self) -> Duration {
        self.finished.saturating_duration_since(self.started)
    }

    pub fn elapsed_millis(&self) -> u64 {
        u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}
