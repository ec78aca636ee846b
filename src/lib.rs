//! # pipework
//!
//! A JSON HTTP request pipeline for Rust services.
//!
//! Every request runs through the same short chain, and every outcome (a
//! handler result, a typed failure, a panic, a rejected client) ends as
//! exactly one JSON envelope:
//!
//! ```text
//! {"status":"success", ...fields}
//! {"status":"fail","message":"..","data":..}     4xx, caller's fault
//! {"status":"error","message":".."}               5xx, ours; no internals
//! ```
//!
//! ## What the pipeline owns
//!
//! - **Tracing**: a task-local [`tracer::Tracer`] per request (UUID v7 trace
//!   id, start time, final status), echoed in the `x-trace-id` header
//! - **Typed errors**: [`ClientError`] and [`ServerError`] carry a stable
//!   [`ErrorCode`] and the source location they were raised at
//! - **Panic containment**: a panicking handler answers 500, the process
//!   keeps serving
//! - **Rate limiting**: per-client token buckets with idle eviction
//! - **Leveled logging**: structured records over `tracing`, with optional
//!   per-level hooks for alerting
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use pipework::logger::{Level, Logger};
//! use pipework::middleware::{Stack, SLOW_REQUEST};
//! use pipework::{App, ClientError, Error, ErrorCode, Method, Request, Response, Router, Server, StatusCode};
//! use pipework::{RateLimitConfig, RateLimiter};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let logger = Arc::new(Logger::new(Level::Info, "api", pipework::tracer::trace_id));
//!     let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default())?);
//!     let _sweeper = limiter.spawn_eviction();
//!
//!     let router = Router::new().group("/v1", |v1| {
//!         v1.on(Method::GET, "/users/{id}", get_user)
//!     });
//!     let stack = Stack::standard(Arc::clone(&logger), limiter, SLOW_REQUEST);
//!     let app = App::new(router, &stack, logger)?;
//!
//!     Server::bind("0.0.0.0:4000")?.serve(app).await?;
//!     Ok(())
//! }
//!
//! async fn get_user(req: Request) -> Result<Response, Error> {
//!     let id: u64 = req.param("id")
//!         .and_then(|id| id.parse().ok())
//!         .ok_or_else(|| ClientError::new(ErrorCode::BadRequest, None, "id must be a number"))?;
//!     Response::success(StatusCode::OK, &json!({ "user": { "id": id } }))
//! }
//! ```

mod app;
mod error;
mod handler;
mod request;
mod response;
mod router;
mod server;

pub mod config;
pub mod health;
pub mod limiter;
pub mod logger;
pub mod middleware;
pub mod tracer;

pub use app::{App, TRACE_ID_HEADER};
pub use error::{BoxError, ClientError, Error, ErrorCode, ServeError, ServerError};
pub use handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler, HandlerResult};
pub use http::{Method, StatusCode};
pub use limiter::{EvictionTask, LimiterError, RateLimitConfig, RateLimiter};
pub use request::{MAX_BODY_BYTES, Request};
pub use response::Response;
pub use router::{RouteError, Router};
pub use server::{Server, serve_listener};
