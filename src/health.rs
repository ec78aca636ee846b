//! Built-in healthcheck handler.
//!
//! | Path              | Answer                                                         |
//! |-------------------|----------------------------------------------------------------|
//! | `/v1/healthcheck` | `{"status":"success","environment":..,"version":..,"build":..}` |
//!
//! ```rust
//! use pipework::{Method, Router, health::{self, HealthInfo}};
//!
//! let info = HealthInfo::new("production", "1.0.0", "abc123");
//! let app = Router::new().group("/v1", |v1| {
//!     v1.on(Method::GET, "/healthcheck", health::healthcheck(info))
//! });
//! ```
//!
//! The handler has no dependencies: if the process can answer HTTP at all,
//! it is healthy. Register your own handler instead if you need to gate on
//! a database or downstream service.

use serde::Serialize;

use crate::handler::Handler;
use crate::request::Request;
use crate::response::Response;
use crate::StatusCode;

/// What the healthcheck reports about the running build.
#[derive(Clone, Debug, Serialize)]
pub struct HealthInfo {
    pub environment: String,
    pub version: String,
    pub build: String,
}

impl HealthInfo {
    pub fn new(
        environment: impl Into<String>,
        version: impl Into<String>,
        build: impl Into<String>,
    ) -> Self {
        Self {
            environment: environment.into(),
            version: version.into(),
            build: build.into(),
        }
    }
}

/// A handler answering `200 OK` with `info` in a success envelope.
pub fn healthcheck(info: HealthInfo) -> impl Handler {
    move |_req: Request| {
        let info = info.clone();
        async move { Response::success(StatusCode::OK, &info) }
    }
}
