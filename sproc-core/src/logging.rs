//! Logging setup.
//!
//! The engine logs through `tracing`. Nothing is printed unless a subscriber is
//! installed, either by the application or by [`init`] (with the
//! `tracing-subscriber` feature).
//!
//! # Environment Variables
//!
//! - `SPROC_DEBUG=true|1|yes` - Enable debug logging
//! - `SPROC_LOG_LEVEL=trace|debug|info|warn|error` - Set a specific level
//! - `SPROC_LOG_FORMAT=json|pretty|compact` - Output format (default: json)
//!
//! ```rust,no_run
//! use sproc_core::logging;
//!
//! logging::init();
//! ```
//!
//! Inside the crates, use the tracing macros with structured fields:
//!
//! ```rust,ignore
//! debug!(context = %id, procedure, "Beginning transaction");
//! warn!(procedure, error = %e, "Rollback failed");
//! ```

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

/// Check if debug logging is enabled via `SPROC_DEBUG`.
#[inline]
pub fn is_debug_enabled() -> bool {
    debug_flag(env::var("SPROC_DEBUG").ok().as_deref())
}

/// Get the configured log level.
///
/// `SPROC_LOG_LEVEL` wins; otherwise "debug" when `SPROC_DEBUG` is on, else "warn".
pub fn get_log_level() -> &'static str {
    resolve_level(
        env::var("SPROC_LOG_LEVEL").ok().as_deref(),
        is_debug_enabled(),
    )
}

/// Get the configured log format. Defaults to "json".
pub fn get_log_format() -> &'static str {
    resolve_format(env::var("SPROC_LOG_FORMAT").ok().as_deref())
}

fn debug_flag(value: Option<&str>) -> bool {
    value.is_some_and(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
}

fn resolve_level(level: Option<&str>, debug: bool) -> &'static str {
    let fallback = if debug { "debug" } else { "warn" };
    match level.map(str::to_lowercase).as_deref() {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("info") => "info",
        Some("warn") => "warn",
        Some("error") => "error",
        _ => fallback,
    }
}

fn resolve_format(format: Option<&str>) -> &'static str {
    match format.map(str::to_lowercase).as_deref() {
        Some("pretty") => "pretty",
        Some("compact") => "compact",
        _ => "json",
    }
}

/// Initialize logging from the environment.
///
/// Does nothing unless `SPROC_DEBUG` or `SPROC_LOG_LEVEL` is set. Only the
/// first call has an effect.
pub fn init() {
    if !is_debug_enabled() && env::var("SPROC_LOG_LEVEL").is_err() {
        return;
    }
    init_with(get_log_level(), get_log_format());
}

/// Initialize logging with an explicit level and format, ignoring the environment.
pub fn init_with(level: &str, format: &str) {
    INIT.call_once(|| {
        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let level = resolve_level(Some(level), false);
            let format = resolve_format(Some(format));
            let filter = EnvFilter::try_new(format!(
                "sproc={},sproc_core={},sproc_mssql={}",
                level, level, level
            ))
            .unwrap_or_else(|_| EnvFilter::new("warn"));

            match format {
                "json" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().json())
                        .init();
                }
                "compact" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().compact())
                        .init();
                }
                _ => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().pretty())
                        .init();
                }
            }

            tracing::info!(level, format, "sproc logging initialized");
        }

        #[cfg(not(feature = "tracing-subscriber"))]
        {
            let _ = (level, format);
        }
    });
}
