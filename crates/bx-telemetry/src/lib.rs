//! # Blockswap Telemetry
//!
//! Process-wide logging and the Prometheus registry every subsystem records
//! into.
//!
//! Subsystems only touch [`metrics`] statics through [`metric_inc!`],
//! [`metric_add!`] and [`time_histogram!`]; the node binary calls
//! [`init_telemetry`] once and holds the guard until shutdown.
//!
//! ```rust,ignore
//! let _guard = bx_telemetry::init_telemetry(&TelemetryConfig::from_env())?;
//! ```
//!
//! | Variable | Default | Effect |
//! |----------|---------|--------|
//! | `BX_SERVICE_NAME` | `blockswap` | Name on the startup line |
//! | `BX_LOG_LEVEL` / `RUST_LOG` | `info` | `EnvFilter` directive |
//! | `BX_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `BX_JSON_LOGS` | `false`, `true` in containers | JSON log lines |
//! | `BX_DUMP_METRICS` | `false` | Log all metrics on exit |

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::LogFormat;
pub use metrics::{encode_metrics, register_metrics, MetricsHandle};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("logger initialization failed: {0}")]
    LoggerInit(String),

    #[error("metrics registration failed: {0}")]
    MetricsInit(String),

    #[error("invalid telemetry configuration: {0}")]
    Config(String),
}

/// Register metrics and install the global subscriber.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics = register_metrics()?;
    let format = logging::init_logging(config)?;

    tracing::info!(
        service = %config.service_name,
        filter = %config.log_level,
        ?format,
        "Telemetry initialized"
    );

    Ok(TelemetryGuard {
        format,
        dump_metrics: config.dump_metrics_on_exit,
        _metrics: metrics,
    })
}

/// Keeps telemetry alive; hold it for the lifetime of the process.
pub struct TelemetryGuard {
    format: LogFormat,
    dump_metrics: bool,
    _metrics: MetricsHandle,
}

impl TelemetryGuard {
    pub fn format(&self) -> LogFormat {
        self.format
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if !self.dump_metrics {
            return;
        }
        match encode_metrics() {
            Ok(text) => tracing::info!(metrics = %text, "Final metrics"),
            Err(e) => tracing::warn!(error = %e, "Could not encode metrics"),
        }
    }
}

/// Increment a counter, optionally through its label values.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}

/// Add to a counter, optionally through its label values.
#[macro_export]
macro_rules! metric_add {
    ($metric:expr, $value:expr) => {
        $metric.inc_by($value)
    };
    ($metric:expr, $labels:expr, $value:expr) => {
        $metric.with_label_values($labels).inc_by($value)
    };
}
