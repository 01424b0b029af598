//! AccessEvent - frozen snapshot of one completed HTTP exchange
//!
//! Every value is owned; nothing refers back to the server's request or
//! response objects. Produced only by [`crate::EventFreezer`].

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::MultiMap;

/// Placeholder for attributes that have no value (e.g. no session)
pub const NA: &str = "-";

/// Content length recorded when the response size is unknown
pub const UNKNOWN_CONTENT_LENGTH: i64 = -1;

/// Status recorded when the response was never committed
pub const UNCOMMITTED_STATUS: u16 = 0;

/// Frozen event shared between the hub and its sinks
pub type SharedEvent = Arc<AccessEvent>;

/// One completed HTTP exchange.
///
/// Read-only: fields are private and only accessors are exposed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessEvent {
    pub(crate) timestamp: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) started_at: Option<Instant>,
    pub(crate) elapsed_millis: u64,
    pub(crate) remote_addr: String,
    pub(crate) remote_host: String,
    pub(crate) server_name: String,
    pub(crate) local_port: u16,
    pub(crate) method: String,
    pub(crate) request_uri: String,
    pub(crate) query_string: String,
    pub(crate) protocol: String,
    pub(crate) request_headers: MultiMap,
    pub(crate) request_parameters: MultiMap,
    pub(crate) request_content: Option<String>,
    pub(crate) status_code: u16,
    pub(crate) response_headers: MultiMap,
    pub(crate) content_length: i64,
    pub(crate) session_id: String,
    pub(crate) thread_name: String,
}

impl AccessEvent {
    /// Wall-clock instant the request began
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Monotonic instant the request began (not carried across serialization)
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn elapsed_millis(&self) -> u64 {
        self.elapsed_millis
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// Resolved client host name, or the address when resolution was off or failed
    pub fn remote_host(&self) -> &str {
        &self.remote_host
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Path component only; never contains the query
    pub fn request_uri(&self) -> &str {
        &self.request_uri
    }

    /// `"?<query>"`, or empty when the request had no query
    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Request line, synthesized as `"<method> <uri><query> <protocol>"`
    pub fn request_url(&self) -> String {
        let mut url = String::with_capacity(
            self.method.len()
                + self.request_uri.len()
                + self.query_string.len()
                + self.protocol.len()
                + 2,
        );
        url.push_str(&self.method);
        url.push(' ');
        url.push_str(&self.request_uri);
        url.push_str(&self.query_string);
        url.push(' ');
        url.push_str(&self.protocol);
        url
    }

    pub fn request_headers(&self) -> &MultiMap {
        &self.request_headers
    }

    /// First value of a request header (case-insensitive)
    pub fn request_header(&self, name: &str) -> Option<&str> {
        self.request_headers.first(name)
    }

    pub fn request_parameters(&self) -> &MultiMap {
        &self.request_parameters
    }

    /// All values of a request parameter; empty when absent
    pub fn request_parameter(&self, name: &str) -> &[String] {
        self.request_parameters.get(name).unwrap_or_default()
    }

    /// Request body text, present only when content capture was enabled
    pub fn request_content(&self) -> Option<&str> {
        self.request_content.as_deref()
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn response_headers(&self) -> &MultiMap {
        &self.response_headers
    }

    /// First value of a response header (case-insensitive)
    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.response_headers.first(name)
    }

    /// Bytes written in the response body, or `-1` when unknown
    pub fn content_length(&self) -> i64 {
        self.content_length
    }

    /// Existing session id, or `"-"`
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Name of the thread that completed the request
    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    /// Whether the response was committed before the event was captured
    pub fn is_committed(&self) -> bool {
        self.status_code != UNCOMMITTED_STATUS
    }
}
