use std::str::FromStr;
use std::time::Instant;
use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::core::error::PanelError;

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub log_level: LogLevel,
    /// Let `RUST_LOG` override `log_level` when set.
    pub honour_env: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: LogLevel::Info,
            honour_env: true,
        }
    }
}

/// Log levels matching tracing's levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = PanelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(PanelError::ConfigError(format!("unknown log level: {}", other))),
        }
    }
}

/// Installs the global subscriber. Logs go to stderr so the dashboard
/// rendering on stdout stays clean.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), PanelError> {
    if !config.enabled {
        return Ok(());
    }

    let env_filter = if config.honour_env {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.log_level.directive()))
    } else {
        EnvFilter::new(config.log_level.directive())
    };

    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| PanelError::ConfigError(format!("telemetry already initialised: {}", e)))
}

/// Logs the wall time of an operation when dropped.
pub struct PerformanceTracker {
    start_time: Instant,
    operation_name: String,
}

impl PerformanceTracker {
    pub fn new(operation_name: &str) -> Self {
        Self {
            start_time: Instant::now(),
            operation_name: operation_name.to_string(),
        }
    }
}

impl Drop for PerformanceTracker {
    fn drop(&mut self) {
        let duration = self.start_time.elapsed();
        debug!(
            operation = %self.operation_name,
            duration_ms = %duration.as_millis(),
            "Operation completed"
        );
    }
}
