//! Process configuration read from the environment.
//!
//! | Variable                     | Default        |
//! |------------------------------|----------------|
//! | `PIPEWORK_ADDR`              | `0.0.0.0:4000` |
//! | `PIPEWORK_ENVIRONMENT`       | `development`  |
//! | `PIPEWORK_VERSION`           | crate version  |
//! | `PIPEWORK_BUILD`             | `dev`          |
//! | `PIPEWORK_LOG_LEVEL`         | `info`         |
//! | `PIPEWORK_LOG_FORMAT`        | `json`         |
//! | `PIPEWORK_SLOW_REQUEST_MS`   | `500`          |
//! | `PIPEWORK_LIMITER_ENABLED`   | `true`         |
//! | `PIPEWORK_LIMITER_RPS`       | `2`            |
//! | `PIPEWORK_LIMITER_BURST`     | `4`            |
//! | `PIPEWORK_LIMITER_SWEEP_SECS`| `60`           |
//! | `PIPEWORK_LIMITER_STALE_SECS`| `180`          |
//!
//! Unset variables take their default. A variable that is set but cannot be
//! parsed is an error, never silently replaced.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::limiter::{LimiterError, MAX_INTERVAL, RateLimitConfig};
use crate::logger::{Level, LogConfig, LogFormat};
use crate::middleware::SLOW_REQUEST;

const PREFIX: &str = "PIPEWORK_";

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: String,
    pub environment: String,
    pub version: String,
    pub build: String,
    pub log: LogConfig,
    pub slow_request: Duration,
    pub limiter: RateLimitConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:4000".to_owned(),
            environment: "development".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            build: "dev".to_owned(),
            log: LogConfig::default(),
            slow_request: SLOW_REQUEST,
            limiter: RateLimitConfig::default(),
        }
    }
}

/// A variable that is set to something unusable.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name}={value:?}: {reason}")]
    Invalid {
        name: String,
        value: String,
        reason: String,
    },
}

impl Config {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads variables through `lookup`, which receives full names such as
    /// `PIPEWORK_ADDR`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars(lookup);
        let defaults = Self::default();

        let limiter = RateLimitConfig {
            enabled: vars.parse("LIMITER_ENABLED", defaults.limiter.enabled)?,
            rps: vars.parse("LIMITER_RPS", defaults.limiter.rps)?,
            burst: vars.parse("LIMITER_BURST", defaults.limiter.burst)?,
            sweep_interval: vars.secs("LIMITER_SWEEP_SECS", defaults.limiter.sweep_interval)?,
            stale_after: vars.secs("LIMITER_STALE_SECS", defaults.limiter.stale_after)?,
        };
        if let Err(e) = limiter.quota() {
            let key = match e {
                LimiterError::Rate(_) => "LIMITER_RPS",
                LimiterError::Burst => "LIMITER_BURST",
                LimiterError::Interval { name: "sweep_interval", .. } => "LIMITER_SWEEP_SECS",
                LimiterError::Interval { .. } => "LIMITER_STALE_SECS",
            };
            return Err(vars.invalid(key, &e.to_string()));
        }

        let slow_ms: u64 = vars.parse("SLOW_REQUEST_MS", defaults.slow_request.as_millis() as u64)?;

        Ok(Self {
            addr: vars.string("ADDR", defaults.addr),
            environment: vars.string("ENVIRONMENT", defaults.environment),
            version: vars.string("VERSION", defaults.version),
            build: vars.string("BUILD", defaults.build),
            log: LogConfig {
                level: vars.parse::<Level>("LOG_LEVEL", defaults.log.level)?,
                format: vars.parse::<LogFormat>("LOG_FORMAT", defaults.log.format)?,
            },
            slow_request: Duration::from_millis(slow_ms),
            limiter,
        })
    }
}

struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(&format!("{PREFIX}{key}"))
    }

    fn string(&self, key: &str, default: String) -> String {
        self.get(key).unwrap_or(default)
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                name: format!("{PREFIX}{key}"),
                value: raw.clone(),
                reason: e.to_string(),
            }),
        }
    }

    /// A whole number of seconds in `1..=MAX_INTERVAL`.
    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let secs: u64 = self.parse(key, default.as_secs())?;
        if secs == 0 {
            return Err(self.invalid(key, "must be at least 1 second"));
        }
        if secs > MAX_INTERVAL.as_secs() {
            let reason = format!("must be at most {} seconds", MAX_INTERVAL.as_secs());
            return Err(self.invalid(key, &reason));
        }
        Ok(Duration::from_secs(secs))
    }

    fn invalid(&self, key: &str, reason: &str) -> ConfigError {
        ConfigError::Invalid {
            name: format!("{PREFIX}{key}"),
            value: self.get(key).unwrap_or_default(),
            reason: reason.to_owned(),
        }
    }
}
