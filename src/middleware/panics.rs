use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;

use super::{Middleware, Next};
use crate::error::ServerError;
use crate::handler::BoxFuture;
use crate::request::Request;

/// Converts a panic anywhere below it into `ServerError(Internal)`.
///
/// Covers panics while the inner chain builds its future as well as while
/// it is polled. The panic payload becomes the log-only cause; the request
/// task itself completes normally. Ordinary `Err` returns pass through.
pub struct RecoverPanics;

impl Middleware for RecoverPanics {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        Box::pin(async move {
            let inner = AssertUnwindSafe(async move { next.run(req).await });
            match inner.catch_unwind().await {
                Ok(result) => result,
                Err(payload) => {
                    let cause = format!("panic: {}", panic_message(payload.as_ref()));
                    Err(ServerError::internal(cause).into())
                }
            }
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}
