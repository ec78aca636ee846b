//! Error taxonomy.
//!
//! Handlers never write error bodies. They return an [`Error`] and the
//! [`Errors`](crate::middleware::Errors) middleware renders it. The taxonomy
//! is closed: every failure is either a [`ClientError`] (the caller did
//! something wrong, the message is safe to show them) or a [`ServerError`]
//! (we did something wrong, the cause stays in the logs). Anything else is an
//! [`Error::Unexpected`] and is treated like an internal server error.
//!
//! | Code                | Status |
//! |---------------------|--------|
//! | `Internal`          | 500    |
//! | `BadRequest`        | 400    |
//! | `FailedValidation`  | 422    |
//! | `NotFound`          | 404    |
//! | `MethodNotAllowed`  | 405    |
//! | `EditConflict`      | 409    |
//! | `RateLimitExceeded` | 429    |
//! | `AlreadyExists`     | 409    |

use std::borrow::Cow;
use std::fmt;
use std::net::AddrParseError;
use std::panic::Location;

use http::StatusCode;
use serde_json::Value;

/// A boxed error used as the log-only cause of a [`ServerError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// ── ErrorCode ─────────────────────────────────────────────────────────────────

/// The closed set of failure codes a handler can report.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorCode {
    Internal,
    BadRequest,
    FailedValidation,
    NotFound,
    MethodNotAllowed,
    EditConflict,
    RateLimitExceeded,
    AlreadyExists,
}

impl ErrorCode {
    /// Every code, in declaration order.
    pub const ALL: [ErrorCode; 8] = [
        Self::Internal,
        Self::BadRequest,
        Self::FailedValidation,
        Self::NotFound,
        Self::MethodNotAllowed,
        Self::EditConflict,
        Self::RateLimitExceeded,
        Self::AlreadyExists,
    ];

    /// The HTTP status this code is rendered with.
    pub fn status(self) -> StatusCode {
        match self {
            Self::Internal          => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadRequest        => StatusCode::BAD_REQUEST,
            Self::FailedValidation  => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound          => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed  => StatusCode::METHOD_NOT_ALLOWED,
            Self::EditConflict      => StatusCode::CONFLICT,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::AlreadyExists     => StatusCode::CONFLICT,
        }
    }

    /// Snake-case name, used in log attributes.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Internal          => "internal",
            Self::BadRequest        => "bad_request",
            Self::FailedValidation  => "failed_validation",
            Self::NotFound          => "not_found",
            Self::MethodNotAllowed  => "method_not_allowed",
            Self::EditConflict      => "edit_conflict",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::AlreadyExists     => "already_exists",
        }
    }

    /// The stock client-facing message for this code.
    pub fn default_message(self) -> &'static str {
        match self {
            Self::Internal          => "the server encountered a problem and could not process your request",
            Self::BadRequest        => "the request payload contains malformed JSON",
            Self::FailedValidation  => "the request payload failed the validation rules",
            Self::NotFound          => "the requested resource could not be found",
            Self::MethodNotAllowed  => "the method is not supported for the requested resource",
            Self::EditConflict      => "unable to update the resource due to an edit conflict",
            Self::RateLimitExceeded => "rate limit exceeded",
            Self::AlreadyExists     => "the record already exists",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── ClientError ───────────────────────────────────────────────────────────────

/// An expected, caller-caused failure. Its message and data go on the wire.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ClientError {
    code: ErrorCode,
    data: Option<Value>,
    message: Cow<'static, str>,
    location: &'static Location<'static>,
}

impl ClientError {
    /// Records the caller's source location for diagnostics.
    #[track_caller]
    pub fn new(code: ErrorCode, data: Option<Value>, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            data,
            message: message.into(),
            location: Location::caller(),
        }
    }

    /// A client error carrying the code's stock message and no data.
    #[track_caller]
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, None, code.default_message())
    }

    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn code(&self) -> ErrorCode { self.code }
    pub fn data(&self) -> Option<&Value> { self.data.as_ref() }
    pub fn message(&self) -> &str { &self.message }
    pub fn location(&self) -> &'static Location<'static> { self.location }
}

// ── ServerError ───────────────────────────────────────────────────────────────

/// An unexpected, system-caused failure.
///
/// The `cause` is for operators only; clients see `message`, which should be
/// generic. `Display` prints the message, never the cause.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ServerError {
    code: ErrorCode,
    #[source]
    cause: BoxError,
    message: Cow<'static, str>,
    location: &'static Location<'static>,
}

impl ServerError {
    #[track_caller]
    pub fn new(
        code: ErrorCode,
        cause: impl Into<BoxError>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code,
            cause: cause.into(),
            message: message.into(),
            location: Location::caller(),
        }
    }

    /// `Internal` with the stock generic message.
    #[track_caller]
    pub fn internal(cause: impl Into<BoxError>) -> Self {
        Self::new(ErrorCode::Internal, cause, ErrorCode::Internal.default_message())
    }

    pub fn code(&self) -> ErrorCode { self.code }
    pub fn message(&self) -> &str { &self.message }
    pub fn location(&self) -> &'static Location<'static> { self.location }

    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.cause.as_ref()
    }

    /// The cause and its whole source chain, `outer: inner: innermost`.
    pub fn cause_chain(&self) -> String {
        let mut chain = self.cause.to_string();
        let mut source = self.cause.source();
        while let Some(err) = source {
            chain.push_str(": ");
            chain.push_str(&err.to_string());
            source = err.source();
        }
        chain
    }
}

// ── Error ─────────────────────────────────────────────────────────────────────

/// The error type returned by handlers and middleware.
///
/// Anything convertible to [`anyhow::Error`] lands in `Unexpected`, so
/// handlers can write `.context("loading user")?` and still get a safe 500.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl Error {
    /// The status this error is rendered with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Client(e) => e.code().status(),
            Self::Server(e) => e.code().status(),
            Self::Unexpected(_) => ErrorCode::Internal.status(),
        }
    }
}

// ── Infrastructure errors ─────────────────────────────────────────────────────

/// Failures of the server adapter itself: bad listen address, bind or accept.
///
/// These never reach a client. Request-level failures are [`Error`]s.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("invalid listen address `{addr}`")]
    Addr {
        addr: String,
        #[source]
        source: AddrParseError,
    },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ErrorCode::Internal, 500)]
    #[case(ErrorCode::BadRequest, 400)]
    #[case(ErrorCode::FailedValidation, 422)]
    #[case(ErrorCode::NotFound, 404)]
    #[case(ErrorCode::MethodNotAllowed, 405)]
    #[case(ErrorCode::EditConflict, 409)]
    #[case(ErrorCode::RateLimitExceeded, 429)]
    #[case(ErrorCode::AlreadyExists, 409)]
    fn code_maps_to_status(#[case] code: ErrorCode, #[case] expected: u16) {
        assert_eq!(code.status().as_u16(), expected);
    }

    #[test]
    fn status_table_is_total() {
        for code in ErrorCode::ALL {
            let status = code.status();
            assert!(status.is_client_error() || status.is_server_error(), "{code}: {status}");
            assert!(!code.default_message().is_empty());
        }
        let names: HashSet<_> = ErrorCode::ALL.iter().map(|c| c.as_str()).collect();
        assert_eq!(names.len(), ErrorCode::ALL.len());
    }

    #[test]
    fn client_error_records_call_site() {
        let err = ClientError::new(ErrorCode::BadRequest, None, "bad input");
        assert_eq!(err.location().file(), file!());
        assert_eq!(err.to_string(), "bad input");
        assert!(err.data().is_none());
    }

    #[test]
    fn server_error_hides_cause_from_display() {
        let io = std::io::Error::other("disk on fire");
        let err = ServerError::new(ErrorCode::Internal, io, "internal error");
        assert_eq!(err.to_string(), "internal error");
        assert_eq!(err.cause_chain(), "disk on fire");
        assert_eq!(err.location().file(), file!());
    }

    #[test]
    fn cause_chain_walks_sources() {
        let cause = anyhow::anyhow!("connection refused").context("loading user");
        let err = ServerError::internal(cause);
        assert_eq!(err.cause_chain(), "loading user: connection refused");
        assert_eq!(err.message(), ErrorCode::Internal.default_message());
    }

    #[test]
    fn untyped_errors_render_as_internal() {
        let err: Error = anyhow::anyhow!("boom").into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let err: Error = ClientError::from_code(ErrorCode::AlreadyExists).into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }
}
