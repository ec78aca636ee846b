use std::sync::Arc;

use super::{Middleware, Next};
use crate::error::{ClientError, ErrorCode};
use crate::handler::BoxFuture;
use crate::limiter::RateLimiter;
use crate::request::Request;

/// Rejects callers that are over their token budget with
/// `ClientError(RateLimitExceeded)` before the handler runs.
///
/// Callers are keyed by the peer IP address. A disabled limiter lets every
/// request through without touching its state.
pub struct RateLimit {
    limiter: Arc<RateLimiter>,
}

impl RateLimit {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl Middleware for RateLimit {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        if !self.limiter.allow(req.remote_addr().ip()) {
            let err = ClientError::from_code(ErrorCode::RateLimitExceeded);
            return Box::pin(async move { Err(err.into()) });
        }
        next.run(req)
    }
}
