//! Global `tracing` subscriber.
//!
//! An `EnvFilter` in front of a single fmt layer, pretty or JSON. JSON lines
//! carry the span list and source location so shipped logs can be grouped
//! per exchange session or GC run.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::{TelemetryConfig, TelemetryError};

/// Output format the installed subscriber settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
    Silent,
}

impl LogFormat {
    fn for_config(config: &TelemetryConfig) -> Self {
        match (config.console_output, config.json_logs) {
            (false, _) => LogFormat::Silent,
            (true, true) => LogFormat::Json,
            (true, false) => LogFormat::Pretty,
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub(crate) fn init_logging(config: &TelemetryConfig) -> Result<LogFormat, TelemetryError> {
    let filter = EnvFilter::try_new(&config.log_level)
        .map_err(|e| TelemetryError::Config(format!("log level {:?}: {e}", config.log_level)))?;
    let format = LogFormat::for_config(config);

    let layer = match format {
        LogFormat::Silent => None,
        LogFormat::Json => Some(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
        ),
        LogFormat::Pretty => Some(tracing_subscriber::fmt::layer().with_target(true).boxed()),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| TelemetryError::LoggerInit(e.to_string()))?;

    Ok(format)
}

/// Block lifecycle event with fixed `subsystem`, `event` and `cid` fields.
///
/// ```rust,ignore
/// log_block_event!(debug, "blockservice", "block added", cid, size = 42);
/// ```
#[macro_export]
macro_rules! log_block_event {
    ($level:ident, $subsystem:expr, $msg:expr, $cid:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            subsystem = $subsystem,
            event = "block",
            cid = %$cid,
            $($($field)*,)?
            $msg
        )
    };
}
