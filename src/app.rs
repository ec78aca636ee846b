//! The request pipeline: one [`Tracer`] per request, route lookup, the
//! middleware chain, and the default not-found / method-not-allowed answers.

use std::sync::Arc;

use http::{HeaderName, HeaderValue, StatusCode};
use serde_json::Value;

use crate::logger::Logger;
use crate::middleware::Stack;
use crate::request::Request;
use crate::response::Response;
use crate::router::{Lookup, RouteError, Router, Routes};
use crate::tracer::{self, Tracer};

/// Response header carrying the request's trace id.
pub const TRACE_ID_HEADER: HeaderName = HeaderName::from_static("x-trace-id");

const NOT_FOUND_MESSAGE: &str = "the requested resource could not be found";

/// A compiled application, ready to serve.
///
/// Build it once at startup and hand it to [`Server::serve`](crate::Server::serve),
/// or call [`App::dispatch`] directly.
pub struct App {
    routes: Routes,
    logger: Arc<Logger>,
}

impl App {
    /// Wraps every route of `router` in `stack` and compiles the table.
    pub fn new(router: Router, stack: &Stack, logger: Arc<Logger>) -> Result<Self, RouteError> {
        Ok(Self { routes: router.compile(stack)?, logger })
    }

    /// Serves one request and produces exactly one response.
    ///
    /// A fresh [`Tracer`] is bound to the request before anything else runs;
    /// its trace id is echoed in the `x-trace-id` header.
    pub async fn dispatch(&self, req: Request) -> Response {
        let tracer = Tracer::new();
        let trace_id = HeaderValue::from_str(tracer.trace_id()).ok();

        let mut res = tracer::scope(tracer, self.route(req)).await;

        if let Some(value) = trace_id {
            res.insert_header(TRACE_ID_HEADER, value);
        }
        res
    }

    async fn route(&self, mut req: Request) -> Response {
        match self.routes.lookup(req.method(), req.path()) {
            Lookup::Found(handler, params) => {
                req.set_params(params);
                match handler.call(req).await {
                    Ok(res) => res,
                    Err(err) => {
                        // Only reachable with a stack that has no `Errors` layer.
                        self.logger.error(
                            "caught an error propagated through the chain",
                            &[("error", Value::from(format!("{err:?}")))],
                        );
                        let res = Response::internal();
                        tracer::record_status(res.status());
                        res
                    }
                }
            }
            Lookup::MethodNotAllowed => {
                let message = format!(
                    "the {} method is not supported for the requested resource",
                    req.method()
                );
                rejection(StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", &message)
            }
            Lookup::NotFound => rejection(StatusCode::NOT_FOUND, "not_found", NOT_FOUND_MESSAGE),
        }
    }
}

fn rejection(status: StatusCode, code: &str, message: &str) -> Response {
    tracer::record_status(status);
    Response::rejection(status, code, message)
}
