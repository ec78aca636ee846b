use std::sync::Arc;

use serde_json::Value;

use super::{Middleware, Next};
use crate::error::{Error, ErrorCode};
use crate::handler::BoxFuture;
use crate::logger::Logger;
use crate::request::Request;
use crate::response::Response;
use crate::tracer;

/// Turns every error from the inner chain into exactly one response.
///
/// This is the only place error bodies are written. Server errors are logged
/// at `Error` with their real cause and answered with their generic message;
/// client errors are logged at `Info` and answered with their message and
/// data; anything untyped is logged in full and answered as `Internal`.
/// The inner chain therefore never sees this middleware fail.
pub struct Errors {
    logger: Arc<Logger>,
}

impl Errors {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self { logger }
    }
}

impl Middleware for Errors {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        let logger = Arc::clone(&self.logger);

        Box::pin(async move {
            let res = match next.run(req).await {
                Ok(res) => res,
                Err(err) => render(&logger, err),
            };
            tracer::record_status(res.status());
            Ok(res)
        })
    }
}

fn render(logger: &Logger, err: Error) -> Response {
    match err {
        Error::Server(e) => {
            logger.error(
                "caught an internal server error during request",
                &[
                    ("code", Value::from(e.code().as_str())),
                    ("error", Value::from(e.cause_chain())),
                    ("source", Value::from(e.location().to_string())),
                ],
            );
            Response::error(e.code().status(), e.message())
        }
        Error::Client(e) => {
            logger.info(
                "caught a client error during request",
                &[
                    ("code", Value::from(e.code().as_str())),
                    ("error", Value::from(e.message())),
                    ("source", Value::from(e.location().to_string())),
                ],
            );
            Response::fail(e.code().status(), e.message(), e.data())
        }
        Error::Unexpected(e) => {
            logger.error(
                "caught an unexpected error during request",
                &[
                    ("code", Value::from(ErrorCode::Internal.as_str())),
                    ("error", Value::from(format!("{e:#}"))),
                ],
            );
            Response::internal()
        }
    }
}
