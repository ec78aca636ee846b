//! HTTP server and graceful shutdown.
//!
//! The server is a thin adapter: it accepts connections, reads each request
//! body (up to [`MAX_BODY_BYTES`]), and hands the request to
//! [`App::dispatch`]. Everything else happens in the pipeline.
//!
//! # Graceful shutdown
//!
//! On **SIGTERM** or **Ctrl-C** the server:
//! 1. Immediately stops `listener.accept()`, so no new connections are made.
//! 2. Asks every open connection to close: idle keep-alive connections
//!    close at once, a connection with a request in flight closes after
//!    writing that response.
//! 3. Returns from [`Server::serve`], which lets `main` stop background work
//!    (such as the rate limiter's eviction sweep) and exit cleanly.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::app::App;
use crate::error::ServeError;
use crate::request::{Body, MAX_BODY_BYTES, Request};

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// ```rust
    /// use pipework::Server;
    /// let server = Server::bind("0.0.0.0:4000").unwrap();
    /// assert_eq!(server.addr().port(), 4000);
    /// ```
    pub fn bind(addr: &str) -> Result<Self, ServeError> {
        let parsed = addr.parse().map_err(|source| ServeError::Addr {
            addr: addr.to_owned(),
            source,
        })?;
        Ok(Self { addr: parsed })
    }

    pub fn addr(&self) -> SocketAddr { self.addr }

    /// Starts accepting connections and dispatching them through `app`.
    ///
    /// Returns only after a full graceful shutdown (SIGTERM or Ctrl-C,
    /// followed by all in-flight requests completing).
    pub async fn serve(self, app: App) -> Result<(), ServeError> {
        self.serve_with_shutdown(app, shutdown_signal()).await
    }

    /// [`serve`](Server::serve), stopping when `signal` resolves instead of
    /// on an OS signal.
    pub async fn serve_with_shutdown(
        self,
        app: App,
        signal: impl Future<Output = ()>,
    ) -> Result<(), ServeError> {
        let listener = TcpListener::bind(self.addr).await?;
        serve_listener(listener, app, signal).await
    }
}

/// Runs the accept loop on an already-bound listener until `signal`
/// resolves, then drains.
///
/// Idle keep-alive connections are closed at once; connections with a
/// request in flight finish that response first.
pub async fn serve_listener(
    listener: TcpListener,
    app: App,
    signal: impl Future<Output = ()>,
) -> Result<(), ServeError> {
    let app = Arc::new(app);
    let builder = ConnBuilder::new(TokioExecutor::new());
    let graceful = GracefulShutdown::new();

    info!(addr = %listener.local_addr()?, "pipework listening");

    // Tracks every connection task so shutdown can wait for them.
    let mut tasks = tokio::task::JoinSet::new();

    tokio::pin!(signal);

    loop {
        tokio::select! {
            // Check shutdown first so a SIGTERM stops accepting at once,
            // even if more connections are queued.
            biased;

            () = &mut signal => {
                info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                break;
            }

            res = listener.accept() => {
                let (stream, remote_addr) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let app = Arc::clone(&app);

                // Called once per request on the connection.
                let svc = service_fn(move |req| {
                    let app = Arc::clone(&app);
                    async move { dispatch(app, req, remote_addr).await }
                });

                // Serves HTTP/1.1 or HTTP/2, whichever the client speaks.
                let conn = builder.serve_connection(TokioIo::new(stream), svc).into_owned();
                let conn = graceful.watch(conn);

                tasks.spawn(async move {
                    if let Err(e) = conn.await {
                        error!(peer = %remote_addr, "connection error: {e}");
                    }
                });
            }

            // Reap finished connection tasks so the set does not grow
            // without bound.
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    // No more accepts: closing the listener refuses new connections while
    // the open ones wind down.
    drop(listener);
    graceful.shutdown().await;
    while tasks.join_next().await.is_some() {}

    info!("pipework stopped");
    Ok(())
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Reads the body and runs the pipeline. Never fails: every outcome is a
/// response.
async fn dispatch(
    app: Arc<App>,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();

    let body = match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => Body::Full(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Body::TooLarge,
        Err(_) => Body::Unreadable,
    };

    let response = app.dispatch(Request::from_parts(parts, body, remote_addr)).await;
    Ok(response.into_inner())
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or Ctrl-C. If a handler cannot be
/// installed, that signal is simply never observed.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
