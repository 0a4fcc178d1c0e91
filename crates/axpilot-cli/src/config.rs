//! Runtime settings resolution.
//!
//! Every setting resolves with the same priority:
//! 1. Command-line flag
//! 2. `AXPILOT_*` environment variable (empty values are ignored)
//! 3. Built-in default
//!
//! An environment value that fails to parse is logged and skipped.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use axpilot_core::cache::DEFAULT_CACHE_CAPACITY;

pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8888;
pub const DEFAULT_TARGET: &str = "127.0.0.1:8888";
pub const DEFAULT_SETTLE_MS: u64 = 200;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

pub const ENV_BIND_HOST: &str = "AXPILOT_BIND_HOST";
pub const ENV_PORT: &str = "AXPILOT_PORT";
pub const ENV_TARGET: &str = "AXPILOT_TARGET";
pub const ENV_CACHE_CAPACITY: &str = "AXPILOT_CACHE_CAPACITY";
pub const ENV_SETTLE_MS: &str = "AXPILOT_SETTLE_MS";
pub const ENV_TIMEOUT_MS: &str = "AXPILOT_TIMEOUT_MS";

/// Non-empty value of an environment variable.
fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = env_string(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring {}='{}': not a valid value", name, raw);
            None
        }
    }
}

/// Interface the target server listens on.
pub fn bind_host(flag: Option<String>) -> String {
    flag.or_else(|| env_string(ENV_BIND_HOST))
        .unwrap_or_else(|| DEFAULT_BIND_HOST.to_string())
}

pub fn port(flag: Option<u16>) -> u16 {
    flag.or_else(|| env_parse(ENV_PORT)).unwrap_or(DEFAULT_PORT)
}

/// `host:port` of the target a driver connects to.
pub fn target(flag: Option<String>) -> String {
    flag.or_else(|| env_string(ENV_TARGET))
        .unwrap_or_else(|| DEFAULT_TARGET.to_string())
}

pub fn cache_capacity(flag: Option<usize>) -> usize {
    flag.or_else(|| env_parse(ENV_CACHE_CAPACITY))
        .unwrap_or(DEFAULT_CACHE_CAPACITY)
}

/// Delay after each executed primitive.
pub fn settle(flag: Option<u64>) -> Duration {
    Duration::from_millis(
        flag.or_else(|| env_parse(ENV_SETTLE_MS))
            .unwrap_or(DEFAULT_SETTLE_MS),
    )
}

/// How long a driver waits for each response.
pub fn request_timeout(flag: Option<u64>) -> Duration {
    Duration::from_millis(
        flag.or_else(|| env_parse(ENV_TIMEOUT_MS))
            .unwrap_or(DEFAULT_TIMEOUT_MS),
    )
}
