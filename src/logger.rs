//! Structured, leveled logger with per-level event hooks.
//!
//! [`Logger`] is a thin layer over `tracing`: each call becomes one `tracing`
//! event carrying the service name, the current trace id, the caller's
//! `file:line` and the attributes rendered as a JSON object. The installed
//! subscriber (see [`init`]) decides the output format and serializes
//! concurrent writers.
//!
//! On top of the plain sink, a logger may carry [`Events`]: one optional hook
//! per level, called synchronously with a normalized [`Record`] every time a
//! record at that level passes the minimum-level filter. The main use is
//! out-of-band alerting on `Error` records.
//!
//! ```rust
//! use pipework::logger::{Level, Logger};
//! use serde_json::json;
//!
//! let log = Logger::new(Level::Info, "api", pipework::tracer::trace_id);
//! log.info("user created", &[("user_id", json!(42))]);
//! log.debug("filtered out", &[]);
//! ```

use std::fmt;
use std::panic::Location;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

/// A key/value pair attached to a log call.
pub type Attr<'a> = (&'a str, Value);

/// Supplies the trace id for the record being written.
pub type TraceIdFn = Arc<dyn Fn() -> String + Send + Sync>;

/// Called with every record at the hook's level.
pub type EventHandler = Arc<dyn Fn(&Record) + Send + Sync>;

// ── Level ─────────────────────────────────────────────────────────────────────

/// Severity, ordered `Debug < Info < Warn < Error`.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info  => "info",
            Self::Warn  => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info"  => Ok(Self::Info),
            "warn"  => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other   => Err(format!("unknown level `{other}` (expected debug|info|warn|error)")),
        }
    }
}

// ── Record & Events ───────────────────────────────────────────────────────────

/// The normalized form of one log call, independent of the output format.
#[derive(Clone, Debug, Serialize)]
pub struct Record {
    pub time: DateTime<Utc>,
    pub level: Level,
    pub message: String,
    /// Caller attributes plus `trace_id` and `file`.
    pub attributes: Map<String, Value>,
}

impl Record {
    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}

/// Optional hooks, one per level.
#[derive(Clone, Default)]
pub struct Events {
    pub debug: Option<EventHandler>,
    pub info: Option<EventHandler>,
    pub warn: Option<EventHandler>,
    pub error: Option<EventHandler>,
}

impl Events {
    fn for_level(&self, level: Level) -> Option<&EventHandler> {
        match level {
            Level::Debug => self.debug.as_ref(),
            Level::Info  => self.info.as_ref(),
            Level::Warn  => self.warn.as_ref(),
            Level::Error => self.error.as_ref(),
        }
    }
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Events")
            .field("debug", &self.debug.is_some())
            .field("info", &self.info.is_some())
            .field("warn", &self.warn.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

// ── Logger ────────────────────────────────────────────────────────────────────

/// Leveled logger. Cheap to share behind an `Arc`.
pub struct Logger {
    min_level: Level,
    service: String,
    trace_id_fn: TraceIdFn,
    events: Events,
}

impl Logger {
    /// `trace_id_fn` is asked for the trace id on every record; pass
    /// [`tracer::trace_id`](crate::tracer::trace_id) to pick up the request
    /// in scope.
    pub fn new(
        min_level: Level,
        service: impl Into<String>,
        trace_id_fn: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            min_level,
            service: service.into(),
            trace_id_fn: Arc::new(trace_id_fn),
            events: Events::default(),
        }
    }

    pub fn with_events(mut self, events: Events) -> Self {
        self.events = events;
        self
    }

    pub fn min_level(&self) -> Level { self.min_level }

    pub fn enabled(&self, level: Level) -> bool {
        level >= self.min_level
    }

    #[track_caller]
    pub fn debug(&self, message: &str, attrs: &[Attr<'_>]) {
        self.log_at(Level::Debug, Location::caller(), message, attrs);
    }

    #[track_caller]
    pub fn info(&self, message: &str, attrs: &[Attr<'_>]) {
        self.log_at(Level::Info, Location::caller(), message, attrs);
    }

    #[track_caller]
    pub fn warn(&self, message: &str, attrs: &[Attr<'_>]) {
        self.log_at(Level::Warn, Location::caller(), message, attrs);
    }

    #[track_caller]
    pub fn error(&self, message: &str, attrs: &[Attr<'_>]) {
        self.log_at(Level::Error, Location::caller(), message, attrs);
    }

    /// Logs with an explicit source location.
    ///
    /// Helpers that wrap the logger should either be `#[track_caller]`
    /// themselves or capture `Location::caller()` and pass it here, so the
    /// record points at the real call site.
    pub fn log_at(
        &self,
        level: Level,
        location: &'static Location<'static>,
        message: &str,
        attrs: &[Attr<'_>],
    ) {
        if !self.enabled(level) {
            return;
        }

        let trace_id = (self.trace_id_fn)();
        let file = source_file(location);

        let mut attributes = Map::with_capacity(attrs.len() + 2);
        for (key, value) in attrs {
            attributes.insert((*key).to_owned(), value.clone());
        }

        let rendered = Rendered(&attributes);
        match level {
            Level::Debug => tracing::debug!(service = %self.service, trace_id = %trace_id, file = %file, attrs = %rendered, "{message}"),
            Level::Info  => tracing::info!(service = %self.service, trace_id = %trace_id, file = %file, attrs = %rendered, "{message}"),
            Level::Warn  => tracing::warn!(service = %self.service, trace_id = %trace_id, file = %file, attrs = %rendered, "{message}"),
            Level::Error => tracing::error!(service = %self.service, trace_id = %trace_id, file = %file, attrs = %rendered, "{message}"),
        }

        if let Some(hook) = self.events.for_level(level) {
            attributes.insert("trace_id".to_owned(), Value::String(trace_id));
            attributes.insert("file".to_owned(), Value::String(file));
            hook(&Record {
                time: Utc::now(),
                level,
                message: message.to_owned(),
                attributes,
            });
        }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("min_level", &self.min_level)
            .field("service", &self.service)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

/// `basename:line` of a source location.
fn source_file(location: &Location<'_>) -> String {
    let name = Path::new(location.file())
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(location.file());
    format!("{name}:{}", location.line())
}

/// Displays an attribute map as a compact JSON object.
struct Rendered<'a>(&'a Map<String, Value>);

impl fmt::Display for Rendered<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self.0).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

// ── Subscriber setup ──────────────────────────────────────────────────────────

/// Output format of the process-wide subscriber.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json"   => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other    => Err(format!("unknown log format `{other}` (expected json|pretty)")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LogConfig {
    /// Minimum level for both the [`Logger`] and the subscriber when
    /// `RUST_LOG` is not set.
    pub level: Level,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: Level::Info, format: LogFormat::Json }
    }
}

/// Installs the process-wide `tracing` subscriber.
///
/// `RUST_LOG` wins over `config.level`. Calling this more than once is a
/// no-op.
pub fn init(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let _ = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
}
