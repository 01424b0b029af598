//! EventFreezer - copies a live exchange into an owned [`AccessEvent`]
//!
//! Two-phase lifecycle:
//! - [`LiveEvent`] borrows the server's request/response handles. Cheap
//!   scalars are read when it is built; header and parameter maps are read
//!   on first access.
//! - [`EventFreezer::freeze`] forces every lazy field, copies it out and
//!   consumes the `LiveEvent`, ending the borrow. The returned event holds
//!   nothing that points back into the server.
//!
//! Freezing runs on the request thread before the hook returns: no I/O, no
//! deferred copies.

use std::fmt;

use bytes::Bytes;
use url::form_urlencoded;

use crate::{
    AccessEvent, CaptureOptions, ExchangeTiming, LiveRequest, LiveResponse, MultiMap,
    MultiMapBuilder, NA, UNCOMMITTED_STATUS, UNKNOWN_CONTENT_LENGTH,
};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// A live attribute that could not be read and was replaced by a sentinel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureIssue {
    /// Response never committed (client went away); status 0, length -1
    ResponseNotCommitted,
    /// Peer address unknown; recorded as `"-"`
    RemoteAddrUnavailable,
    /// Body parameters requested but the body was already consumed
    BodyUnavailable,
    /// Reading the body failed
    BodyReadFailed(String),
}

impl fmt::Display for CaptureIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResponseNotCommitted => f.write_str("response was not committed"),
            Self::RemoteAddrUnavailable => f.write_str("remote address unavailable"),
            Self::BodyUnavailable => {
                f.write_str("request body already consumed, body parameters left empty")
            }
            Self::BodyReadFailed(msg) => write!(f, "request body unreadable: {msg}"),
        }
    }
}

/// Raw event bound to the live handles of one exchange
pub struct LiveEvent<'a> {
    request: &'a mut dyn LiveRequest,
    response: &'a dyn LiveResponse,
    options: &'a CaptureOptions,

    // Read eagerly
    timing: ExchangeTiming,
    status_code: u16,
    content_length: i64,
    thread_name: String,

    // Read on first access
    request_headers: Option<MultiMap>,
    response_headers: Option<MultiMap>,
    request_parameters: Option<MultiMap>,
    request_content: Option<Option<String>>,
    body: Option<Option<Bytes>>,

    issues: Vec<CaptureIssue>,
}

impl<'a> LiveEvent<'a> {
    fn new(
        request: &'a mut dyn LiveRequest,
        response: &'a dyn LiveResponse,
        options: &'a CaptureOptions,
        timing: ExchangeTiming,
    ) -> Self {
        let mut issues = Vec::new();

        let (status_code, content_length) = match response.status() {
            Some(status) => (
                status,
                response
                    .content_length()
                    .and_then(|n| i64::try_from(n).ok())
                    .unwrap_or(UNKNOWN_CONTENT_LENGTH),
            ),
            None => {
                issues.push(CaptureIssue::ResponseNotCommitted);
                (UNCOMMITTED_STATUS, UNKNOWN_CONTENT_LENGTH)
            }
        };

        let thread_name = std::thread::current()
            .name()
            .unwrap_or("unnamed")
            .to_string();

        Self {
            request,
            response,
            options,
            timing,
            status_code,
            content_length,
            thread_name,
            request_headers: None,
            response_headers: None,
            request_parameters: None,
            request_content: None,
            body: None,
            issues,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn elapsed_millis(&self) -> u64 {
        self.timing.elapsed_millis()
    }

    pub fn content_length(&self) -> i64 {
        self.content_length
    }

    /// Path and query of the live request target, split at the first `?`
    pub fn target(&self) -> (&str, Option<&str>) {
        let raw = self.request.request_uri();
        let (path, inline_query) = match raw.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (raw, None),
        };
        let query = self
            .request
            .query()
            .or(inline_query)
            .filter(|q| !q.is_empty());
        (path, query)
    }

    pub fn request_headers(&mut self) -> &MultiMap {
        let request = &*self.request;
        self.request_headers.get_or_insert_with(|| {
            let mut builder = MultiMapBuilder::case_insensitive();
            request.visit_headers(&mut |name, value| builder.push(name, value));
            builder.finish()
        })
    }

    pub fn response_headers(&mut self) -> &MultiMap {
        let response = self.response;
        self.response_headers.get_or_insert_with(|| {
            let mut builder = MultiMapBuilder::case_insensitive();
            response.visit_headers(&mut |name, value| builder.push(name, value));
            builder.finish()
        })
    }

    /// Query parameters, plus form body parameters when enabled
    pub fn request_parameters(&mut self) -> &MultiMap {
        if self.request_parameters.is_none() {
            let parameters = self.collect_parameters();
            self.request_parameters = Some(parameters);
        }
        self.request_parameters.get_or_insert_with(MultiMap::new)
    }

    /// Body text, only when content capture is enabled
    pub fn request_content(&mut self) -> Option<&str> {
        if self.request_content.is_none() {
            let content = if self.options.capture_request_content {
                let limit = self.options.max_content_bytes;
                self.body().map(|body| {
                    let end = body.len().min(limit);
                    String::from_utf8_lossy(&body[..end]).into_owned()
                })
            } else {
                None
            };
            self.request_content = Some(content);
        }
        self.request_content.as_ref().and_then(|c| c.as_deref())
    }

    /// Problems met so far while reading the live handles
    pub fn issues(&self) -> &[CaptureIssue] {
        &self.issues
    }

    fn collect_parameters(&mut self) -> MultiMap {
        let mut builder = MultiMapBuilder::case_sensitive();

        if let (_, Some(query)) = self.target() {
            for (name, value) in form_urlencoded::parse(query.as_bytes()) {
                builder.push(&name, &value);
            }
        }

        if self.options.capture_body_parameters && self.is_form_encoded() {
            match self.body() {
                Some(body) => {
                    for (name, value) in form_urlencoded::parse(&body) {
                        builder.push(&name, &value);
                    }
                }
                None => self.issues.push(CaptureIssue::BodyUnavailable),
            }
        }

        builder.finish()
    }

    fn is_form_encoded(&self) -> bool {
        self.request.content_type().is_some_and(|ct| {
            ct.split(';')
                .next()
                .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(FORM_CONTENT_TYPE))
        })
    }

    /// Body bytes, read at most once and only if a capture option needs them
    fn body(&mut self) -> Option<Bytes> {
        if self.body.is_none() {
            let loaded = if self.options.reads_body() {
                match self.request.take_body() {
                    Ok(body) => body,
                    Err(e) => {
                        self.issues.push(CaptureIssue::BodyReadFailed(e.to_string()));
                        None
                    }
                }
            } else {
                None
            };
            self.body = Some(loaded);
        }
        self.body.clone().flatten()
    }

    fn into_event(mut self) -> (AccessEvent, Vec<CaptureIssue>) {
        // Force every lazy attribute while the handles are still valid
        self.request_headers();
        self.response_headers();
        self.request_parameters();
        self.request_content();

        let (path, query) = self.target();
        let request_uri = path.to_string();
        let query_string = query.map(|q| format!("?{q}")).unwrap_or_default();

        let remote_addr = match self.request.remote_addr().filter(|a| !a.is_empty()) {
            Some(addr) => addr,
            None => {
                self.issues.push(CaptureIssue::RemoteAddrUnavailable);
                NA.to_string()
            }
        };
        let remote_host = if self.options.resolve_remote_host {
            self.request
                .remote_host()
                .filter(|h| !h.is_empty())
                .unwrap_or_else(|| remote_addr.clone())
        } else {
            remote_addr.clone()
        };

        let request_headers = self.request_headers.take().unwrap_or_default();
        let server_name = self
            .request
            .server_name()
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| request_headers.first("host").map(host_without_port))
            .unwrap_or_else(|| NA.to_string());

        let session_id = self
            .request
            .session_id()
            .filter(|s| !s.is_empty())
            .unwrap_or(NA)
            .to_string();

        let event = AccessEvent {
            timestamp: self.timing.started_wall,
            started_at: Some(self.timing.started),
            elapsed_millis: self.timing.elapsed_millis(),
            remote_addr,
            remote_host,
            server_name,
            local_port: self.request.local_port().unwrap_or(0),
            method: self.request.method().to_string(),
            request_uri,
            query_string,
            protocol: self.request.protocol().to_string(),
            request_headers,
            request_parameters: self.request_parameters.take().unwrap_or_default(),
            request_content: self.request_content.take().flatten(),
            status_code: self.status_code,
            response_headers: self.response_headers.take().unwrap_or_default(),
            content_length: self.content_length,
            session_id,
            thread_name: std::mem::take(&mut self.thread_name),
        };

        (event, self.issues)
    }
}

fn host_without_port(host: &str) -> String {
    if host.starts_with('[') {
        // IPv6 literal
        return match host.find(']') {
            Some(end) => host[..=end].to_string(),
            None => host.to_string(),
        };
    }
    host.split(':').next().unwrap_or(host).to_string()
}

/// Turns live exchanges into frozen events under one set of capture options
#[derive(Debug, Clone, Default)]
pub struct EventFreezer {
    options: CaptureOptions,
}

impl EventFreezer {
    pub fn new(options: CaptureOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    /// Build the raw event; reads status, length and timing immediately
    pub fn capture<'a>(
        &'a self,
        request: &'a mut dyn LiveRequest,
        response: &'a dyn LiveResponse,
        timing: ExchangeTiming,
    ) -> LiveEvent<'a> {
        LiveEvent::new(request, response, &self.options, timing)
    }

    /// Copy everything out of the live handles. Returns once all copies are done.
    pub fn freeze(&self, live: LiveEvent<'_>) -> AccessEvent {
        live.into_event().0
    }

    /// Like [`freeze`](Self::freeze), also returning the sentinel substitutions made
    pub fn freeze_reporting(&self, live: LiveEvent<'_>) -> (AccessEvent, Vec<CaptureIssue>) {
        live.into_event()
    }
}
