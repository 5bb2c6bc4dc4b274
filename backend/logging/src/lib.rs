//! Structured logging for the Canopy host.
//!
//! Handles subscriber setup (console + rolling NDJSON file), payload redaction,
//! and an audit logger for lifecycle events published on the bus.

pub mod event_logger;
pub mod logger;
pub mod redact;

pub use event_logger::{EventLogEntry, EventLogger};
pub use logger::{init_logger, LoggerOptions};
pub use redact::{redact_sensitive_data, redact_value};
