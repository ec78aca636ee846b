//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! The router holds handlers of *different* types in one table, and every
//! middleware wraps "some handler" without knowing which. Both need a single
//! type, so handlers are erased behind [`ErasedHandler`] trait objects.
//!
//! ```text
//! async fn get_user(req: Request) -> Result<Response, Error> { … }
//!        ↓ router.on(Method::GET, "/users/{id}", get_user)
//! get_user.into_boxed_handler()                   ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(get_user))                   ← stored as BoxedHandler
//!        ↓ wrapped by each middleware in the stack
//! handler.call(req) at request time               ← one vtable dispatch per layer
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Error;
use crate::request::Request;
use crate::response::Response;

/// What every handler and middleware resolves to.
pub type HandlerResult = Result<Response, Error>;

/// A heap-allocated, type-erased future resolving to a [`HandlerResult`].
///
/// `Send + 'static` lets tokio move the request task across worker threads.
pub type BoxFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'static>>;

/// Dynamic dispatch interface shared by handlers and middleware layers.
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture;
}

/// A type-erased handler shared across concurrent requests.
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Implemented for every valid route handler.
///
/// Satisfied automatically by any function or closure of the shape
///
/// ```text
/// async fn name(req: Request) -> Result<Response, Error>
/// ```
///
/// Handlers write their own success envelope with
/// [`Response::success`] and report failures by returning an [`Error`]; they
/// never build error bodies themselves.
///
/// The trait is sealed: only the blanket impl below satisfies it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
}

impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Bridges a concrete handler `F` to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        Box::pin((self.0)(req))
    }
}
