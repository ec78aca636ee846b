//! Per-request context.
//!
//! Every dispatched request gets exactly one [`Tracer`], bound to the
//! request's task with a tokio task-local before any middleware runs. Code
//! further down the chain reads it through the free functions in this module
//! instead of having it threaded through every signature.
//!
//! Outside of a request scope the accessors fall back to neutral values:
//! [`trace_id`] returns [`DEFAULT_TRACE_ID`], [`status`] returns `None`.

use std::cell::OnceCell;
use std::future::Future;
use std::time::Duration;

use http::StatusCode;
use tokio::time::Instant;
use uuid::Uuid;

/// Trace id reported when no request is in scope.
pub const DEFAULT_TRACE_ID: &str = "00000000-0000-0000-0000-000000000000";

tokio::task_local! {
    static CURRENT: Tracer;
}

/// Timing, identity and outcome of one request.
#[derive(Debug)]
pub struct Tracer {
    started: Instant,
    trace_id: String,
    status: OnceCell<StatusCode>,
}

impl Tracer {
    /// Starts the clock and generates a UUID v7 trace id.
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            trace_id: Uuid::now_v7().to_string(),
            status: OnceCell::new(),
        }
    }

    pub fn started(&self) -> Instant { self.started }
    pub fn trace_id(&self) -> &str { &self.trace_id }
    pub fn status(&self) -> Option<StatusCode> { self.status.get().copied() }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Records the final response status. Only the first call has effect.
    fn set_status(&self, status: StatusCode) -> bool {
        self.status.set(status).is_ok()
    }
}

impl Default for Tracer {
    fn default() -> Self { Self::new() }
}

/// Runs `fut` with `tracer` as the current request context.
pub async fn scope<F: Future>(tracer: Tracer, fut: F) -> F::Output {
    CURRENT.scope(tracer, fut).await
}

/// Runs `f` against the current tracer, if a request is in scope.
pub fn with<R>(f: impl FnOnce(&Tracer) -> R) -> Option<R> {
    CURRENT.try_with(f).ok()
}

/// Trace id of the request in scope, or [`DEFAULT_TRACE_ID`].
///
/// This is the accessor handed to [`Logger::new`](crate::logger::Logger::new).
pub fn trace_id() -> String {
    with(|t| t.trace_id.clone()).unwrap_or_else(|| DEFAULT_TRACE_ID.to_owned())
}

/// Status recorded for the request in scope, once the response is final.
pub fn status() -> Option<StatusCode> {
    with(Tracer::status).flatten()
}

/// Time since the request in scope entered the pipeline.
pub fn elapsed() -> Option<Duration> {
    with(Tracer::elapsed)
}

/// Stamps the final status on the request in scope. Returns `false` when a
/// status was already recorded or no request is in scope.
pub(crate) fn record_status(status: StatusCode) -> bool {
    with(|t| t.set_status(status)).unwrap_or(false)
}
