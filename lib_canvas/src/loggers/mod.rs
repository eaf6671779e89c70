//! # Loggers Module
//!
//! Subscriber installation and log file housekeeping.

/// Console plus rolling JSON file logging.
pub mod setup;

pub use setup::{cleanup_old_logs, setup_logging};
