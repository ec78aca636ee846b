//! Radix-tree request router.
//!
//! [`Router`] only collects registrations. [`App::new`](crate::App::new)
//! wraps each handler in the middleware stack and compiles the table into
//! one `matchit` tree per HTTP method: O(path-length) lookup, no allocation
//! on a miss.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use matchit::Router as MatchitRouter;

use crate::handler::{BoxedHandler, Handler};
use crate::middleware::Stack;

/// A route table under construction.
///
/// Each [`Router::on`] call returns `self` so registrations chain naturally.
/// Path parameters use `{name}` syntax and are read with
/// [`Request::param`](crate::Request::param):
///
/// ```rust
/// # use pipework::{Error, Method, Request, Response, Router};
/// # async fn list_users(_: Request) -> Result<Response, Error> { unimplemented!() }
/// # async fn get_user(_: Request) -> Result<Response, Error> { unimplemented!() }
/// Router::new().group("/v1", |v1| {
///     v1.on(Method::GET, "/users", list_users)
///       .on(Method::GET, "/users/{username}", get_user)
/// });
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<(Method, String, BoxedHandler)>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a method + path pair.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes.push((method, path.to_owned(), handler.into_boxed_handler()));
        self
    }

    /// Registers every route added by `f` under `prefix`.
    pub fn group(mut self, prefix: &str, f: impl FnOnce(Router) -> Router) -> Self {
        let prefix = prefix.trim_end_matches('/');
        for (method, path, handler) in f(Router::new()).routes {
            self.routes.push((method, format!("{prefix}{path}"), handler));
        }
        self
    }

    pub fn len(&self) -> usize { self.routes.len() }
    pub fn is_empty(&self) -> bool { self.routes.is_empty() }

    /// Wraps every handler in `stack` and builds the lookup trees.
    pub(crate) fn compile(self, stack: &Stack) -> Result<Routes, RouteError> {
        let mut trees: HashMap<Method, MatchitRouter<BoxedHandler>> = HashMap::new();
        for (method, path, handler) in self.routes {
            trees
                .entry(method)
                .or_default()
                .insert(path.clone(), stack.wrap(handler))
                .map_err(|source| RouteError { path, source })?;
        }
        Ok(Routes { trees })
    }
}

/// A route that cannot be added to the table: bad syntax or a conflict with
/// an earlier registration.
#[derive(Debug, thiserror::Error)]
#[error("invalid route `{path}`")]
pub struct RouteError {
    path: String,
    #[source]
    source: matchit::InsertError,
}

impl RouteError {
    pub fn path(&self) -> &str { &self.path }
}

/// Outcome of looking a request up in the table.
pub(crate) enum Lookup {
    Found(BoxedHandler, HashMap<String, String>),
    /// The path exists, but not for this method.
    MethodNotAllowed,
    NotFound,
}

/// The compiled, immutable table.
pub(crate) struct Routes {
    trees: HashMap<Method, MatchitRouter<BoxedHandler>>,
}

impl Routes {
    pub(crate) fn lookup(&self, method: &Method, path: &str) -> Lookup {
        if let Some(matched) = self.trees.get(method).and_then(|tree| tree.at(path).ok()) {
            let params = matched.params.iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
            return Lookup::Found(Arc::clone(matched.value), params);
        }

        let elsewhere = self.trees.iter()
            .any(|(m, tree)| m != method && tree.at(path).is_ok());
        if elsewhere { Lookup::MethodNotAllowed } else { Lookup::NotFound }
    }
}
