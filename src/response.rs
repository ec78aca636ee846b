//! Outgoing HTTP response type and the JSON envelopes.
//!
//! Every body this crate produces is one of four shapes:
//!
//! ```text
//! {"status":"success", ...handler fields}          ← Response::success
//! {"status":"fail","message":"..","data":..}       ← client errors
//! {"status":"error","message":".."}                ← server errors
//! {"code":"not_found","message":".."}              ← unmatched routes
//! ```
//!
//! Only `success` is built by handlers. The other three are rendered by the
//! pipeline itself.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, ErrorCode, ServerError};

/// Used if an envelope somehow fails to serialize.
const FALLBACK_BODY: &str =
    "{\"status\":\"error\",\"message\":\"the server encountered a problem and could not process your request\"}\n";

// ── Envelopes ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum Envelope<'a, T: Serialize> {
    Success(&'a T),
    Fail {
        message: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<&'a Value>,
    },
    Error {
        message: &'a str,
    },
}

#[derive(Serialize)]
struct RouteRejection<'a> {
    code: &'a str,
    message: &'a str,
}

// ── Response ──────────────────────────────────────────────────────────────────

/// An outgoing HTTP response with a JSON body.
///
/// ```rust
/// use pipework::{Response, StatusCode};
/// use serde_json::json;
///
/// let res = Response::success(StatusCode::CREATED, &json!({"data": {"id": 42}})).unwrap();
/// assert_eq!(res.status(), StatusCode::CREATED);
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    /// Success envelope: `{"status":"success"}` merged with the fields of
    /// `fields`, which must serialize as a JSON object.
    pub fn success<T: Serialize>(status: StatusCode, fields: &T) -> Result<Self, Error> {
        let body = encode(&Envelope::Success(fields)).map_err(ServerError::internal)?;
        Ok(Self::json(status, body))
    }

    /// `{"status":"fail", ...}` for caller-caused failures.
    pub(crate) fn fail(status: StatusCode, message: &str, data: Option<&Value>) -> Self {
        let envelope: Envelope<'_, ()> = Envelope::Fail { message, data };
        Self::render(status, &envelope)
    }

    /// `{"status":"error", ...}` for server-caused failures.
    pub(crate) fn error(status: StatusCode, message: &str) -> Self {
        let envelope: Envelope<'_, ()> = Envelope::Error { message };
        Self::render(status, &envelope)
    }

    /// The generic internal-error response.
    pub(crate) fn internal() -> Self {
        Self::error(ErrorCode::Internal.status(), ErrorCode::Internal.default_message())
    }

    /// `{"code": .., "message": ..}` for requests that matched no route.
    pub(crate) fn rejection(status: StatusCode, code: &str, message: &str) -> Self {
        Self::render(status, &RouteRejection { code, message })
    }

    /// Pre-encoded JSON bytes with an explicit status.
    pub fn json(status: StatusCode, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self { status, headers, body: body.into() }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub(crate) fn insert_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    pub fn status(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Converts into the `http` type hyper writes to the wire.
    pub fn into_inner(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }

    /// Never fails: falls back to a fixed 500 body.
    fn render<T: Serialize>(status: StatusCode, value: &T) -> Self {
        match encode(value) {
            Ok(body) => Self::json(status, body),
            Err(_) => Self::json(StatusCode::INTERNAL_SERVER_ERROR, FALLBACK_BODY),
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut body = serde_json::to_vec(value)?;
    body.push(b'\n');
    Ok(body)
}
