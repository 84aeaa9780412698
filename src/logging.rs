//! Process-wide `tracing` subscriber setup.
//!
//! The engine only emits events; installing a subscriber is left to the
//! embedding application, which may call [`init_logging`] once at startup.

use crate::error::{BoardError, Result};
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static LOGGING_LEVEL: OnceLock<String> = OnceLock::new();

/// Level used when the caller has no preference
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

/// Installs a formatting subscriber filtered by `level`.
///
/// `level` accepts any `EnvFilter` directive (`info`,
/// `taskboard_core=debug`, ...). Repeating the call with the same level is a
/// no-op; switching to another level is rejected.
pub fn init_logging(level: &str) -> Result<()> {
    let level = level.trim();
    if let Some(active) = LOGGING_LEVEL.get() {
        if active == level {
            return Ok(());
        }
        return Err(BoardError::ConfigError(format!(
            "logging already initialized with `{active}`; refusing to switch to `{level}`"
        )));
    }

    let filter = EnvFilter::try_new(level)
        .map_err(|err| BoardError::ConfigError(format!("invalid log level `{level}`: {err}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|err| BoardError::ConfigError(format!("failed to install subscriber: {err}")))?;

    let _ = LOGGING_LEVEL.set(level.to_string());
    tracing::info!(level, version = env!("CARGO_PKG_VERSION"), "logging initialized");
    Ok(())
}

/// Directive logging was initialized with, if any
pub fn logging_status() -> Option<&'static str> {
    LOGGING_LEVEL.get().map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent_and_rejects_switch() {
        init_logging("warn").unwrap();
        init_logging(" warn ").unwrap();
        assert_eq!(logging_status(), Some("warn"));
        assert!(matches!(
            init_logging("debug"),
            Err(BoardError::ConfigError(_))
        ));
    }

    #[test]
    fn test_default_level_is_valid_directive() {
        assert!(EnvFilter::try_new(default_log_level()).is_ok());
    }
}
