//! # pipework server
//!
//! Reads `PIPEWORK_*` settings (an optional `.env` is loaded first), serves
//! `GET /v1/healthcheck` through the standard middleware stack, and exits
//! after a graceful drain on SIGTERM / Ctrl-C.
//!
//! ```bash
//! PIPEWORK_ADDR=127.0.0.1:8080 PIPEWORK_LOG_FORMAT=pretty cargo run
//! ```

use std::sync::Arc;

use pipework::config::Config;
use pipework::health::{self, HealthInfo};
use pipework::logger::{self, EventHandler, Events, Logger, Record};
use pipework::middleware::Stack;
use pipework::{App, Method, RateLimiter, Router, Server, tracer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    logger::init(&config.log);

    let logger = Arc::new(
        Logger::new(config.log.level, "pipework", tracer::trace_id)
            .with_events(Events { error: Some(alert()), ..Events::default() }),
    );

    let limiter = Arc::new(RateLimiter::new(config.limiter.clone())?);
    let sweeper = limiter.spawn_eviction();

    let info = HealthInfo::new(&config.environment, &config.version, &config.build);
    let router = Router::new().group("/v1", |v1| {
        v1.on(Method::GET, "/healthcheck", health::healthcheck(info))
    });

    let stack = Stack::standard(Arc::clone(&logger), Arc::clone(&limiter), config.slow_request);
    let app = App::new(router, &stack, logger)?;

    tracing::info!(
        environment = %config.environment,
        version = %config.version,
        limiter = limiter.is_enabled(),
        "starting pipework"
    );

    Server::bind(&config.addr)?.serve(app).await?;

    sweeper.stop().await;
    Ok(())
}

/// Forwards every `Error` record to the `alert` target, where an external
/// collector can pick it up.
fn alert() -> EventHandler {
    Arc::new(|record: &Record| {
        tracing::warn!(
            target: "alert",
            trace_id = record.attr("trace_id").and_then(|v| v.as_str()).unwrap_or_default(),
            "{}",
            record.message
        );
    })
}
