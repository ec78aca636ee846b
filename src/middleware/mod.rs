//! Middleware layer.
//!
//! A middleware is a decorator over a handler: it receives the request and a
//! [`Next`] pointing at the rest of the chain, and decides whether, and how,
//! to call it. A [`Stack`] is the ordered list of middleware wrapped around
//! every route at registration time.
//!
//! # The standard order
//!
//! [`Stack::standard`] builds the chain every route runs through, outermost
//! first:
//!
//! ```text
//! Logging → Errors → RecoverPanics → RateLimit → handler
//! ```
//!
//! - `Logging` is outermost so its latency covers every stage.
//! - `Errors` sees every failure from the stages below it, including
//!   recovered panics, so it is the one place error bodies are written.
//! - `RecoverPanics` sits inside `Errors` (a panic becomes a typed error that
//!   `Errors` renders) and outside `RateLimit` and the handler (so a crash in
//!   either is contained).
//! - `RateLimit` is the last gate: rejected requests never reach the handler.

use std::sync::Arc;
use std::time::Duration;

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::limiter::RateLimiter;
use crate::logger::Logger;
use crate::request::Request;

mod errors;
mod log;
mod panics;
mod rate_limit;

pub use errors::Errors;
pub use log::{Logging, SLOW_REQUEST};
pub use panics::RecoverPanics;
pub use rate_limit::RateLimit;

/// A decorator around the rest of the chain.
pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, req: Request, next: Next) -> BoxFuture;
}

/// The remainder of the chain below a middleware.
#[derive(Clone)]
pub struct Next(BoxedHandler);

impl Next {
    pub fn new(handler: BoxedHandler) -> Self {
        Self(handler)
    }

    pub fn run(self, req: Request) -> BoxFuture {
        self.0.call(req)
    }
}

/// One middleware bound to the handler it wraps.
struct Layered {
    middleware: Arc<dyn Middleware>,
    next: BoxedHandler,
}

impl ErasedHandler for Layered {
    fn call(&self, req: Request) -> BoxFuture {
        self.middleware.handle(req, Next(Arc::clone(&self.next)))
    }
}

/// An ordered middleware list, outermost first.
#[derive(Clone, Default)]
pub struct Stack {
    layers: Vec<Arc<dyn Middleware>>,
}

impl Stack {
    /// An empty stack: handlers run bare.
    pub fn new() -> Self {
        Self::default()
    }

    /// `Logging → Errors → RecoverPanics → RateLimit`.
    pub fn standard(logger: Arc<Logger>, limiter: Arc<RateLimiter>, slow_request: Duration) -> Self {
        Self::new()
            .push(Logging::new(Arc::clone(&logger), slow_request))
            .push(Errors::new(logger))
            .push(RecoverPanics)
            .push(RateLimit::new(limiter))
    }

    /// Appends `middleware` inside every layer already pushed.
    pub fn push(mut self, middleware: impl Middleware) -> Self {
        self.layers.push(Arc::new(middleware));
        self
    }

    pub fn len(&self) -> usize { self.layers.len() }
    pub fn is_empty(&self) -> bool { self.layers.is_empty() }

    /// Wraps `handler` so the first pushed layer runs first.
    pub fn wrap(&self, handler: BoxedHandler) -> BoxedHandler {
        self.layers.iter().rev().fold(handler, |next, middleware| {
            Arc::new(Layered { middleware: Arc::clone(middleware), next }) as BoxedHandler
        })
    }
}
