//! Incoming HTTP request type.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::error::Category;

use crate::error::{ClientError, ErrorCode};

/// Bodies larger than this are rejected before any handler sees them.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Outcome of reading the body off the wire.
#[derive(Debug)]
pub(crate) enum Body {
    Full(Bytes),
    TooLarge,
    Unreadable,
}

/// An incoming HTTP request with its body already collected.
#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    remote_addr: SocketAddr,
    params: HashMap<String, String>,
    body: Body,
}

impl Request {
    /// A request with no headers and an empty body.
    pub fn new(method: Method, uri: Uri, remote_addr: SocketAddr) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            remote_addr,
            params: HashMap::new(),
            body: Body::Full(Bytes::new()),
        }
    }

    pub(crate) fn from_parts(parts: http::request::Parts, body: Body, remote_addr: SocketAddr) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            remote_addr,
            params: HashMap::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Body::Full(body.into());
        self
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn remote_addr(&self) -> SocketAddr { self.remote_addr }

    /// Path plus query string, as the client sent it.
    pub fn path_and_query(&self) -> &str {
        self.uri.path_and_query().map_or_else(|| self.uri.path(), |pq| pq.as_str())
    }

    /// Header lookup; `None` if absent or not visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{username}`, `req.param("username")` on
    /// `/users/alice` returns `Some("alice")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Raw body bytes. Empty if the body was rejected while reading.
    pub fn body(&self) -> &[u8] {
        match &self.body {
            Body::Full(bytes) => bytes,
            Body::TooLarge | Body::Unreadable => &[],
        }
    }

    /// Decodes the body as a single JSON value.
    ///
    /// Every failure is a `BadRequest` client error whose `data` says what
    /// exactly was wrong with the payload, so handlers can simply `?` it.
    #[track_caller]
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        let bytes = match &self.body {
            Body::Full(bytes) => bytes,
            Body::TooLarge => {
                return Err(bad_request(format!("body must not be greater than {MAX_BODY_BYTES} bytes")));
            }
            Body::Unreadable => return Err(bad_request("body could not be read".to_owned())),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(bad_request("body must not be empty".to_owned()));
        }

        match serde_json::from_slice(bytes) {
            Ok(value) => Ok(value),
            Err(e) => Err(bad_request(describe(&e))),
        }
    }
}

#[track_caller]
fn bad_request(detail: String) -> ClientError {
    ClientError::new(
        ErrorCode::BadRequest,
        Some(Value::String(detail)),
        ErrorCode::BadRequest.default_message(),
    )
}

fn describe(err: &serde_json::Error) -> String {
    match err.classify() {
        Category::Eof => "body contains badly-formed JSON".to_owned(),
        Category::Syntax => format!(
            "body contains badly-formed JSON (at line {}, column {})",
            err.line(),
            err.column()
        ),
        Category::Data => format!("body contains incorrect JSON: {err}"),
        Category::Io => "body could not be read".to_owned(),
    }
}
