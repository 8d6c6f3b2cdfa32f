//! Logging setup: console output plus daily event and debug log files.
//!
//! Event records are written on the `wafer_monitor::events` target and land in
//! `event.log.YYYY-MM-DD`; with `debug_log` enabled everything the crate logs
//! at debug level or above also goes to `debug.log.YYYY-MM-DD`. Performance
//! samples land in `performance.log.YYYY-MM-DD` whatever the debug setting.

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{
    filter::{filter_fn, Targets},
    fmt::{self, time::ChronoLocal},
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

use crate::daemon::event_log::{EVENT_TARGET, PERFORMANCE_TARGET};
use crate::error::{MonitorError, MonitorResult};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Console filter directive (trace, debug, info, warn, error or an EnvFilter string)
    pub level: String,
    /// Directory holding the dated log files
    pub log_dir: PathBuf,
    /// Write the debug log file
    pub debug_log: bool,
    /// Write the event log file
    pub event_log: bool,
    /// Write the performance sample log file
    pub performance_log: bool,
    /// Log to stderr
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: default_log_dir(),
            debug_log: false,
            event_log: true,
            performance_log: true,
            console: true,
        }
    }
}

/// `<local data dir>/wafer-monitor/EventLog`, or under the temp dir when the
/// platform has no local data dir.
pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(env::temp_dir)
        .join("wafer-monitor")
        .join("EventLog")
}

impl LoggingConfig {
    /// Defaults overridden by `WAFER_MONITOR_LOG_LEVEL`, `WAFER_MONITOR_LOG_DIR`
    /// and `WAFER_MONITOR_DEBUG_LOG`.
    pub fn from_environment() -> Self {
        let mut config = Self::default();

        if let Ok(level) = env::var("WAFER_MONITOR_LOG_LEVEL") {
            if !level.trim().is_empty() {
                config.level = level.trim().to_lowercase();
            }
        }

        if let Ok(dir) = env::var("WAFER_MONITOR_LOG_DIR") {
            if !dir.trim().is_empty() {
                config.log_dir = PathBuf::from(dir);
            }
        }

        if let Ok(flag) = env::var("WAFER_MONITOR_DEBUG_LOG") {
            config.debug_log = matches!(flag.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }

        config
    }

    fn console_filter(&self) -> MonitorResult<EnvFilter> {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .map_err(|e| MonitorError::configuration(format!("Invalid log level '{}': {}", self.level, e)))
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn initialize_logging(config: &LoggingConfig) -> MonitorResult<()> {
    if config.event_log || config.debug_log || config.performance_log {
        std::fs::create_dir_all(&config.log_dir)?;
    }

    let console_layer = if config.console {
        Some(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_timer(ChronoLocal::rfc_3339())
                .with_target(true)
                .with_filter(config.console_filter()?),
        )
    } else {
        None
    };

    let event_layer = if config.event_log {
        let appender = tracing_appender::rolling::daily(&config.log_dir, "event.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        // The writer must outlive every log call.
        std::mem::forget(guard);
        Some(
            fmt::layer()
                .with_writer(writer)
                .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
                .with_target(false)
                .with_level(false)
                .with_ansi(false)
                .with_filter(filter_fn(|meta| meta.target() == EVENT_TARGET)),
        )
    } else {
        None
    };

    let performance_layer = if config.performance_log {
        let appender = tracing_appender::rolling::daily(&config.log_dir, "performance.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        std::mem::forget(guard);
        Some(
            fmt::layer()
                .with_writer(writer)
                .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
                .with_target(false)
                .with_level(false)
                .with_ansi(false)
                .with_filter(filter_fn(|meta| meta.target() == PERFORMANCE_TARGET)),
        )
    } else {
        None
    };

    let debug_layer = if config.debug_log {
        let appender = tracing_appender::rolling::daily(&config.log_dir, "debug.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        std::mem::forget(guard);
        Some(
            fmt::layer()
                .with_writer(writer)
                .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
                .with_target(true)
                .with_ansi(false)
                .with_filter(Targets::new().with_target("wafer_monitor", Level::DEBUG)),
        )
    } else {
        None
    };

    Registry::default()
        .with(console_layer)
        .with(event_layer)
        .with(performance_layer)
        .with(debug_layer)
        .try_init()
        .map_err(|e| MonitorError::internal(format!("Failed to install tracing subscriber: {}", e)))
}
