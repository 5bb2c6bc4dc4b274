//! Structured Logger
//!
//! Wraps `tracing` to provide console output, an optional daily-rotated NDJSON
//! file, and environment-based level control.

use std::path::PathBuf;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log file prefix inside the log directory.
const LOG_FILE_PREFIX: &str = "canopy.log";

#[derive(Debug, Clone)]
pub struct LoggerOptions {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for the rolling file; `None` logs to the console only.
    pub dir: Option<PathBuf>,
    /// Emit JSON on the console instead of human-readable lines.
    pub json: bool,
}

impl Default for LoggerOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            json: false,
        }
    }
}

/// Initialize the global structured logger.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logger(options: &LoggerOptions) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&options.level));

    let console_layer = if options.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_ansi(true)
            .boxed()
    };

    // Rolling file appender: writes NDJSON to `<dir>/canopy.log.YYYY-MM-DD`
    let file_layer = options.dir.as_ref().map(|dir| {
        let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
        fmt::layer().json().with_writer(appender).with_ansi(false)
    });

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();
}
