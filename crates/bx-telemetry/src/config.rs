//! Telemetry settings read from `BX_*` environment variables.

use std::env;

/// Logging and metrics settings for one node process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Recorded on the startup line so interleaved logs can be told apart
    pub service_name: String,

    /// `EnvFilter` directive, e.g. `info` or `bx_04_exchange=debug,info`
    pub log_level: String,

    /// Write log lines to stdout
    pub console_output: bool,

    /// One JSON object per line instead of the human-readable format
    pub json_logs: bool,

    /// Log the Prometheus text exposition when the guard drops
    pub dump_metrics_on_exit: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "blockswap".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
            dump_metrics_on_exit: false,
        }
    }
}

fn flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

impl TelemetryConfig {
    /// Read settings from the process environment.
    ///
    /// `BX_LOG_LEVEL` falls back to `RUST_LOG`. JSON logs default to on when
    /// `DOCKER_CONTAINER` or `KUBERNETES_SERVICE_HOST` is set.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let in_container =
            lookup("DOCKER_CONTAINER").is_some() || lookup("KUBERNETES_SERVICE_HOST").is_some();

        Self {
            service_name: lookup("BX_SERVICE_NAME").unwrap_or(defaults.service_name),
            log_level: lookup("BX_LOG_LEVEL")
                .or_else(|| lookup("RUST_LOG"))
                .unwrap_or(defaults.log_level),
            console_output: lookup("BX_CONSOLE_OUTPUT")
                .map(|v| flag(&v))
                .unwrap_or(defaults.console_output),
            json_logs: lookup("BX_JSON_LOGS")
                .map(|v| flag(&v))
                .unwrap_or(in_container),
            dump_metrics_on_exit: lookup("BX_DUMP_METRICS")
                .map(|v| flag(&v))
                .unwrap_or(defaults.dump_metrics_on_exit),
        }
    }
}
