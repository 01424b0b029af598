//! Mock request/response handles
//!
//! Stand-ins for a server's pooled request/response objects, used by tests
//! and the CLI simulator. `recycle` wipes them the way a server reuses pooled
//! objects after the completion hook returns.

use bytes::Bytes;

use crate::{
    AccessEvent, CaptureOptions, ContractError, EventFreezer, ExchangeTiming, LiveRequest,
    LiveResponse,
};

/// Freeze a mock exchange with default capture options
pub fn freeze(request: &mut MockRequest, response: &MockResponse) -> AccessEvent {
    freeze_with(CaptureOptions::default(), request, response)
}

/// Freeze a mock exchange with the given capture options
pub fn freeze_with(
    options: CaptureOptions,
    request: &mut MockRequest,
    response: &MockResponse,
) -> AccessEvent {
    let freezer = EventFreezer::new(options);
    let timing = ExchangeTiming::start().finish();
    freezer.freeze(freezer.capture(request, response, timing))
}

/// Mock request handle
#[derive(Debug, Clone)]
pub struct MockRequest {
    method: String,
    uri: String,
    query: Option<String>,
    protocol: String,
    remote_addr: Option<String>,
    remote_host: Option<String>,
    server_name: Option<String>,
    local_port: Option<u16>,
    session_id: Option<String>,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
    body_consumed: bool,
    body_error: Option<String>,
}

impl MockRequest {
    /// Request with the given method and target from `127.0.0.1`
    pub fn new(method: &str, uri: &str) -> Self {
        Self {
            method: method.to_string(),
            uri: uri.to_string(),
            query: None,
            protocol: "HTTP/1.1".to_string(),
            remote_addr: Some("127.0.0.1".to_string()),
            remote_host: None,
            server_name: None,
            local_port: None,
            session_id: None,
            headers: Vec::new(),
            body: None,
            body_consumed: false,
            body_error: None,
        }
    }

    pub fn get(uri: &str) -> Self {
        Self::new("GET", uri)
    }

    /// POST with a fixed-length body and content type
    pub fn post(uri: &str, content_type: &str, body: &str) -> Self {
        let mut request = Self::new("POST", uri)
            .header("Content-Type", content_type)
            .header("Content-Length", &body.len().to_string());
        request.body = Some(Bytes::copy_from_slice(body.as_bytes()));
        request
    }

    pub fn query(mut self, query: &str) -> Self {
        self.query = Some(query.to_string());
        self
    }

    pub fn protocol(mut self, protocol: &str) -> Self {
        self.protocol = protocol.to_string();
        self
    }

    pub fn from_addr(mut self, addr: &str) -> Self {
        self.remote_addr = Some(addr.to_string());
        self
    }

    pub fn without_remote_addr(mut self) -> Self {
        self.remote_addr = None;
        self
    }

    /// Host name the server already resolved for the peer
    pub fn resolved_host(mut self, host: &str) -> Self {
        self.remote_host = Some(host.to_string());
        self
    }

    pub fn server_name(mut self, name: &str) -> Self {
        self.server_name = Some(name.to_string());
        self
    }

    pub fn local_port(mut self, port: u16) -> Self {
        self.local_port = Some(port);
        self
    }

    pub fn session(mut self, id: &str) -> Self {
        self.session_id = Some(id.to_string());
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Make body reads fail with `message`
    pub fn fail_body(mut self, message: &str) -> Self {
        self.body_error = Some(message.to_string());
        self
    }

    /// Simulate the application handler reading the body
    pub fn consume_body(&mut self) -> Option<Bytes> {
        self.body_consumed = true;
        self.body.take()
    }

    pub fn body_consumed(&self) -> bool {
        self.body_consumed
    }

    /// Wipe every field, as a server does before reusing a pooled object
    pub fn recycle(&mut self) {
        self.method.clear();
        self.uri.clear();
        self.query = None;
        self.protocol.clear();
        self.remote_addr = None;
        self.remote_host = None;
        self.server_name = None;
        self.local_port = None;
        self.session_id = None;
        self.headers.clear();
        self.body = None;
        self.body_consumed = false;
        self.body_error = None;
    }
}

impl LiveRequest for MockRequest {
    fn method(&self) -> &str {
        &self.method
    }

    fn request_uri(&self) -> &str {
        &self.uri
    }

    fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.clone()
    }

    fn remote_host(&self) -> Option<String> {
        self.remote_host.clone()
    }

    fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn visit_headers(&self, visitor: &mut dyn FnMut(&str, &str)) {
        for (name, value) in &self.headers {
            visitor(name, value);
        }
    }

    fn take_body(&mut self) -> Result<Option<Bytes>, ContractError> {
        if let Some(message) = &self.body_error {
            return Err(ContractError::capture("body", message.clone()));
        }
        self.body_consumed = true;
        Ok(self.body.take())
    }
}

/// Mock response handle
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: Option<u16>,
    content_length: Option<u64>,
    headers: Vec<(String, String)>,
}

impl MockResponse {
    /// Committed response with the given status and body length
    pub fn new(status: u16, content_length: u64) -> Self {
        Self {
            status: Some(status),
            content_length: Some(content_length),
            headers: Vec::new(),
        }
    }

    pub fn ok(content_length: u64) -> Self {
        Self::new(200, content_length)
    }

    /// Response that was never committed (client went away)
    pub fn uncommitted() -> Self {
        Self {
            status: None,
            content_length: None,
            headers: Vec::new(),
        }
    }

    pub fn unknown_length(mut self) -> Self {
        self.content_length = None;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn recycle(&mut self) {
        self.status = None;
        self.content_length = None;
        self.headers.clear();
    }
}

impl LiveResponse for MockResponse {
    fn status(&self) -> Option<u16> {
        self.status
    }

    fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    fn visit_headers(&self, visitor: &mut dyn FnMut(&str, &str)) {
        for (name, value) in &self.headers {
            visitor(name, value);
        }
    }
}
