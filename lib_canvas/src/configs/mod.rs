//! # Configuration Modules
//!
//! Layered process configuration: defaults, JSON file, environment and
//! command line.

/// The canvas gateway settings and their loader.
pub mod config_canvas;

pub use config_canvas::{load_config, load_config_from, CanvasConfig, CanvasSettings, ConfigError};
