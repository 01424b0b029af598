//! Live handles over `http` crate request/response parts
//!
//! For servers built on the `http` types (hyper, axum, ...): wrap the parts
//! plus the connection metadata the parts do not carry, then pass them to
//! [`AccessHook::on_request_complete`](crate::AccessHook::on_request_complete).

use std::net::SocketAddr;

use bytes::Bytes;
use contracts::{ContractError, LiveRequest, LiveResponse};
use http::header::{CONTENT_LENGTH, COOKIE};
use http::{HeaderMap, Version};

/// [`LiveRequest`] over `http::request::Parts`
pub struct HttpRequest<'a> {
    parts: &'a http::request::Parts,
    remote_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    session_cookie: Option<&'a str>,
    body: Option<Bytes>,
}

impl<'a> HttpRequest<'a> {
    pub fn new(parts: &'a http::request::Parts) -> Self {
        Self {
            parts,
            remote_addr: None,
            local_addr: None,
            session_cookie: None,
            body: None,
        }
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn with_local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    /// Cookie carrying the session id (e.g. `"SESSIONID"`)
    pub fn with_session_cookie(mut self, name: &'a str) -> Self {
        self.session_cookie = Some(name);
        self
    }

    /// Body still buffered by the server, if any
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }
}

impl LiveRequest for HttpRequest<'_> {
    fn method(&self) -> &str {
        self.parts.method.as_str()
    }

    fn request_uri(&self) -> &str {
        self.parts.uri.path()
    }

    fn query(&self) -> Option<&str> {
        self.parts.uri.query()
    }

    fn protocol(&self) -> &str {
        protocol_token(self.parts.version)
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.ip().to_string())
    }

    fn server_name(&self) -> Option<&str> {
        // Absolute-form targets carry the host; otherwise the Host header is used
        self.parts.uri.host()
    }

    fn local_port(&self) -> Option<u16> {
        self.local_addr
            .map(|addr| addr.port())
            .or_else(|| self.parts.uri.port_u16())
    }

    fn session_id(&self) -> Option<&str> {
        let name = self.session_cookie?;
        self.parts
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|line| line.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }

    fn visit_headers(&self, visitor: &mut dyn FnMut(&str, &str)) {
        visit_header_map(&self.parts.headers, visitor);
    }

    fn take_body(&mut self) -> Result<Option<Bytes>, ContractError> {
        Ok(self.body.take())
    }
}

/// [`LiveResponse`] over `http::response::Parts`
pub struct HttpResponse<'a> {
    parts: Option<&'a http::response::Parts>,
    bytes_written: Option<u64>,
}

impl<'a> HttpResponse<'a> {
    pub fn new(parts: &'a http::response::Parts) -> Self {
        Self {
            parts: Some(parts),
            bytes_written: None,
        }
    }

    /// Response that never got a head written (client went away)
    pub fn uncommitted() -> Self {
        Self {
            parts: None,
            bytes_written: None,
        }
    }

    /// Body bytes actually written; overrides the `Content-Length` header
    pub fn bytes_written(mut self, bytes: u64) -> Self {
        self.bytes_written = Some(bytes);
        self
    }
}

impl LiveResponse for HttpResponse<'_> {
    fn status(&self) -> Option<u16> {
        self.parts.map(|parts| parts.status.as_u16())
    }

    fn content_length(&self) -> Option<u64> {
        self.bytes_written.or_else(|| {
            self.parts?
                .headers
                .get(CONTENT_LENGTH)?
                .to_str()
                .ok()?
                .trim()
                .parse()
                .ok()
        })
    }

    fn visit_headers(&self, visitor: &mut dyn FnMut(&str, &str)) {
        if let Some(parts) = self.parts {
            visit_header_map(&parts.headers, visitor);
        }
    }
}

fn visit_header_map(headers: &HeaderMap, visitor: &mut dyn FnMut(&str, &str)) {
    for (name, value) in headers {
        match value.to_str() {
            Ok(text) => visitor(name.as_str(), text),
            Err(_) => visitor(name.as_str(), &String::from_utf8_lossy(value.as_bytes())),
        }
    }
}

fn protocol_token(version: Version) -> &'static str {
    if version == Version::HTTP_09 {
        "HTTP/0.9"
    } else if version == Version::HTTP_10 {
        "HTTP/1.0"
    } else if version == Version::HTTP_2 {
        "HTTP/2.0"
    } else if version == Version::HTTP_3 {
        "HTTP/3.0"
    } else {
        "HTTP/1.1"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{CaptureOptions, EventFreezer, ExchangeTiming};

    fn request_parts(builder: http::request::Builder) -> http::request::Parts {
        builder.body(()).unwrap().into_parts().0
    }

    fn response_parts(builder: http::response::Builder) -> http::response::Parts {
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_freeze_http_parts() {
        let req = request_parts(
            http::Request::post("/search?q=rust&q=http")
                .version(Version::HTTP_2)
                .header("Host", "example.org:8443")
                .header("Accept", "text/html")
                .header("Accept", "application/json")
                .header("Cookie", "theme=dark; SESSIONID=abc123")
                .header("Content-Type", "application/x-www-form-urlencoded"),
        );
        let resp = response_parts(
            http::Response::builder()
                .status(201)
                .header("Content-Length", "17"),
        );

        let mut request = HttpRequest::new(&req)
            .with_remote_addr("192.0.2.7:50000".parse().unwrap())
            .with_local_addr("10.0.0.1:8443".parse().unwrap())
            .with_session_cookie("SESSIONID")
            .with_body(Bytes::from_static(b"page=2"));
        let response = HttpResponse::new(&resp);

        let freezer = EventFreezer::new(CaptureOptions {
            capture_body_parameters: true,
            ..CaptureOptions::default()
        });
        let live = freezer.capture(&mut request, &response, ExchangeTiming::start().finish());
        let event = freezer.freeze(live);

        assert_eq!(event.request_url(), "POST /search?q=rust&q=http HTTP/2.0");
        assert_eq!(event.request_parameter("q"), ["rust", "http"]);
        assert_eq!(event.request_parameter("page"), ["2"]);
        assert_eq!(event.remote_addr(), "192.0.2.7");
        assert_eq!(event.server_name(), "example.org");
        assert_eq!(event.local_port(), 8443);
        assert_eq!(event.session_id(), "abc123");
        assert_eq!(
            event.request_headers().get("ACCEPT").unwrap(),
            ["text/html", "application/json"]
        );
        assert_eq!(event.status_code(), 201);
        assert_eq!(event.content_length(), 17);
    }

    #[test]
    fn test_uncommitted_response() {
        let response = HttpResponse::uncommitted();
        assert_eq!(response.status(), None);
        assert_eq!(response.content_length(), None);
    }

    #[test]
    fn test_bytes_written_overrides_header() {
        let resp = response_parts(http::Response::builder().header("Content-Length", "10"));
        assert_eq!(HttpResponse::new(&resp).content_length(), Some(10));
        assert_eq!(
            HttpResponse::new(&resp).bytes_written(3).content_length(),
            Some(3)
        );
    }

    #[test]
    fn test_missing_session_cookie() {
        let req = request_parts(http::Request::get("/").header("Cookie", "a=b"));
        let request = HttpRequest::new(&req).with_session_cookie("SESSIONID");
        assert_eq!(request.session_id(), None);
        assert_eq!(request.protocol(), "HTTP/1.1");
    }
}
