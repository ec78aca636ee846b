use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::{Middleware, Next};
use crate::handler::BoxFuture;
use crate::logger::Logger;
use crate::request::Request;
use crate::tracer;

/// Default latency above which a request is reported as slow.
pub const SLOW_REQUEST: Duration = Duration::from_millis(500);

/// Logs the start and completion of every request.
///
/// Completion carries the final status and the latency measured from the
/// moment the request entered the pipeline. Requests at or above the slow
/// threshold complete at `Warn` with `"slow": true`; the rest at `Info`.
pub struct Logging {
    logger: Arc<Logger>,
    slow: Duration,
}

impl Logging {
    pub fn new(logger: Arc<Logger>, slow: Duration) -> Self {
        Self { logger, slow }
    }
}

impl Middleware for Logging {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        let logger = Arc::clone(&self.logger);
        let slow = self.slow;

        Box::pin(async move {
            let method = req.method().to_string();
            let path = req.path_and_query().to_owned();
            let remote_addr = req.remote_addr().to_string();

            logger.info(
                "request started",
                &[
                    ("method", Value::from(method.as_str())),
                    ("path", Value::from(path.as_str())),
                    ("remote_addr", Value::from(remote_addr.as_str())),
                ],
            );

            let result = next.run(req).await;

            let elapsed = tracer::elapsed().unwrap_or_default();
            let status = tracer::status()
                .or_else(|| result.as_ref().ok().map(|res| res.status()))
                .map_or(0, |s| s.as_u16());

            let attrs = [
                ("method", Value::from(method)),
                ("path", Value::from(path)),
                ("remote_addr", Value::from(remote_addr)),
                ("status", Value::from(status)),
                ("since", Value::from(format!("{elapsed:?}"))),
                ("elapsed_ms", Value::from(elapsed.as_millis() as u64)),
            ];

            if elapsed >= slow {
                let mut attrs = attrs.to_vec();
                attrs.push(("slow", Value::Bool(true)));
                logger.warn("request completed (slow)", &attrs);
            } else {
                logger.info("request completed", &attrs);
            }

            result
        })
    }
}
